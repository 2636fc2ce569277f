//! Nominatim-backed geocoder.
//!
//! Issues `GET {base}/search?postalcode=..&country=..&format=json` and caches
//! results per postal code using `moka` (24 hour TTL).

use std::sync::Arc;
use std::time::Duration;

use moka::future::Cache;
use serde::Deserialize;
use tracing::{debug, instrument, warn};
use url::Url;

use super::{Coordinates, GeocodeError, Geocoder, normalize_postal_code};
use crate::config::GeocoderConfig;

const CACHE_TTL: Duration = Duration::from_secs(24 * 60 * 60);
const CACHE_CAPACITY: u64 = 1000;
const USER_AGENT: &str = concat!("hearth-storefront/", env!("CARGO_PKG_VERSION"));

#[derive(Debug, Deserialize)]
struct SearchHit {
    lat: String,
    lon: String,
}

/// Geocoder for the Nominatim search API.
///
/// Cheap to clone; clones share the HTTP client and cache.
#[derive(Clone)]
pub struct NominatimGeocoder {
    inner: Arc<NominatimInner>,
}

struct NominatimInner {
    client: reqwest::Client,
    search_url: Url,
    country: String,
    // `None` entries cache "no such postal code" answers.
    cache: Cache<String, Option<Coordinates>>,
}

impl NominatimGeocoder {
    /// Create a new geocoder.
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be built.
    pub fn new(config: &GeocoderConfig) -> Result<Self, GeocodeError> {
        let client = reqwest::Client::builder()
            .timeout(config.timeout)
            .user_agent(USER_AGENT)
            .build()?;

        let mut search_url = config.base_url.clone();
        if let Ok(mut path) = search_url.path_segments_mut() {
            path.pop_if_empty().push("search");
        }

        let cache = Cache::builder()
            .max_capacity(CACHE_CAPACITY)
            .time_to_live(CACHE_TTL)
            .build();

        Ok(Self {
            inner: Arc::new(NominatimInner {
                client,
                search_url,
                country: config.country.clone(),
                cache,
            }),
        })
    }

    fn search_url(&self, postal_code: &str) -> Url {
        let mut url = self.inner.search_url.clone();
        url.query_pairs_mut()
            .append_pair("postalcode", postal_code)
            .append_pair("country", &self.inner.country)
            .append_pair("format", "json");
        url
    }

    /// Query the service without the cache.
    async fn search(&self, postal_code: &str) -> Result<Option<Coordinates>, GeocodeError> {
        let response = self
            .inner
            .client
            .get(self.search_url(postal_code))
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(GeocodeError::Status(status.as_u16()));
        }

        let hits: Vec<SearchHit> = response.json().await?;
        hits.first().map(parse_hit).transpose()
    }
}

fn parse_hit(hit: &SearchHit) -> Result<Coordinates, GeocodeError> {
    let latitude = hit.lat.trim().parse::<f64>();
    let longitude = hit.lon.trim().parse::<f64>();
    match (latitude, longitude) {
        (Ok(latitude), Ok(longitude)) => {
            let coords = Coordinates::new(latitude, longitude);
            if coords.is_valid() {
                Ok(coords)
            } else {
                Err(GeocodeError::InvalidCoordinates(format!("{latitude},{longitude}")))
            }
        }
        _ => Err(GeocodeError::InvalidCoordinates(format!("{},{}", hit.lat, hit.lon))),
    }
}

impl Geocoder for NominatimGeocoder {
    #[instrument(skip(self))]
    async fn locate(&self, postal_code: &str) -> Option<Coordinates> {
        let code = normalize_postal_code(postal_code)?;

        if let Some(cached) = self.inner.cache.get(&code).await {
            debug!("Cache hit for postal code");
            return cached;
        }

        match self.search(&code).await {
            Ok(found) => {
                if found.is_none() {
                    debug!("Postal code not found");
                }
                self.inner.cache.insert(code, found).await;
                found
            }
            Err(e) => {
                warn!(error = %e, "Geocoding failed, distance stays pending");
                None
            }
        }
    }
}
