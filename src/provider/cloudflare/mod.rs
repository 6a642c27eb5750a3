mod traits;

use std::sync::RwLock;

use cloudflare::{
    endpoints,
    framework::{
        self,
        apiclient::ApiClient,
        auth::Credentials,
        response::{ApiFailure, ApiResponse},
        Environment, HttpApiClient, HttpApiClientConfig,
    },
};
use log::{debug, trace};

use crate::endpoint::{Endpoint, RecordType};

use self::traits::{endpoint_to_content, record_to_endpoint};
use super::{domain_for_hostname, filter_zones, Provider, ProviderError, Zone};

const CLOUDFLARE_ZONE_PAGE_SIZE: u32 = 50;
const CLOUDFLARE_RECORD_PAGE_SIZE: u32 = 5000;

/// Configuration object for a [`CloudflareProvider`]. Must be supplied when creating a provider.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CloudflareProviderConfig {
    /// The API token to authenticate with. API key login is not supported.
    pub api_token: String,
    /// Whether newly created records should be proxied through Cloudflare's network by default.
    pub proxied_by_default: bool,
    /// Zone names (or `*.`-wildcards) this instance is allowed to manage.
    pub domain_filter: Vec<String>,
    /// Zone names excluded even if they would otherwise match `domain_filter`.
    pub exclude_domains: Vec<String>,
}

/// A [`Provider`] connecting to the Cloudflare API for creating, retrieving and deleting DNS
/// records.
///
/// To create a provider, use [`CloudflareProvider::from_config`].
#[non_exhaustive]
pub struct CloudflareProvider {
    api: CloudflareWrapper,
    proxied_by_default: bool,
    domain_filter: Vec<String>,
    exclude_domains: Vec<String>,
    dry_run: bool,
}

impl CloudflareProvider {
    pub fn from_config(config: &CloudflareProviderConfig) -> Result<CloudflareProvider, ProviderError> {
        let api = CloudflareWrapper::try_new(&config.api_token)?;
        Ok(CloudflareProvider {
            api,
            proxied_by_default: config.proxied_by_default,
            domain_filter: config.domain_filter.clone(),
            exclude_domains: config.exclude_domains.clone(),
            dry_run: false,
        })
    }

    fn zone_for(&self, endpoint: &Endpoint) -> Result<Zone, ProviderError> {
        let apex = domain_for_hostname(&endpoint.dnsname);
        self.api
            .find_zone(&apex)
            .ok_or_else(|| ProviderError::NoZoneForRecord(endpoint.dnsname.clone()))
    }
}

impl Provider for CloudflareProvider {
    fn set_dry_run(&mut self, dry_run: bool) {
        self.dry_run = dry_run;
    }

    fn dry_run(&self) -> bool {
        self.dry_run
    }

    fn zones(&self) -> Result<Vec<Zone>, ProviderError> {
        Ok(filter_zones(
            self.api.cached_zones(),
            &self.domain_filter,
            &self.exclude_domains,
        ))
    }

    fn records(&self) -> Result<Vec<Endpoint>, ProviderError> {
        let zones = self.zones()?;
        let mut out = Vec::new();
        for zone in &zones {
            let records = self.api.list_records(&zone.id)?.result;
            out.extend(
                records
                    .iter()
                    .filter(|r| !matches!(r.content, endpoints::dns::DnsContent::TXT { .. }))
                    .filter_map(|r| record_to_endpoint(r).ok()),
            );
        }
        trace!("collected {} non-TXT records", out.len());
        Ok(out)
    }

    fn txt_records(&self) -> Result<Vec<Endpoint>, ProviderError> {
        let zones = self.zones()?;
        let mut out = Vec::new();
        for zone in &zones {
            let records = self.api.list_records(&zone.id)?.result;
            out.extend(
                records
                    .iter()
                    .filter(|r| matches!(r.content, endpoints::dns::DnsContent::TXT { .. }))
                    .filter_map(|r| record_to_endpoint(r).ok()),
            );
        }
        Ok(out)
    }

    fn create(&self, endpoint: &Endpoint) -> Result<(), ProviderError> {
        let zone = self.zone_for(endpoint)?;
        let content = endpoint_to_content(endpoint)?;
        let proxied = match endpoint.record_type {
            RecordType::A | RecordType::Aaaa => Some(endpoint.proxied || self.proxied_by_default),
            _ => None,
        };
        if !self.dry_run {
            self.api.create_record(&zone.id, &endpoint.dnsname, endpoint.ttl_or_auto(), proxied, content)?;
        }
        debug!("created {} in zone {}", endpoint, zone.name);
        Ok(())
    }

    fn update(&self, old: &Endpoint, new: &Endpoint) -> Result<(), ProviderError> {
        let zone = self.zone_for(old)?;
        let record_id = self
            .api
            .find_record_id(&zone.id, &old.dnsname, old.record_type)
            .ok_or_else(|| ProviderError::RecordNotFound(old.dnsname.clone(), old.record_type))?;
        let content = endpoint_to_content(new)?;
        let proxied = match new.record_type {
            RecordType::A | RecordType::Aaaa => Some(new.proxied || self.proxied_by_default),
            _ => None,
        };
        if !self.dry_run {
            self.api.update_record(&zone.id, &record_id, &new.dnsname, new.ttl_or_auto(), proxied, content)?;
        }
        debug!("updated {} -> {} in zone {}", old, new, zone.name);
        Ok(())
    }

    fn delete(&self, endpoint: &Endpoint) -> Result<(), ProviderError> {
        let zone = self.zone_for(endpoint)?;
        let record_id = self
            .api
            .find_record_id(&zone.id, &endpoint.dnsname, endpoint.record_type)
            .ok_or_else(|| ProviderError::RecordNotFound(endpoint.dnsname.clone(), endpoint.record_type))?;
        if !self.dry_run {
            self.api.delete_record(&zone.id, &record_id)?;
        }
        debug!("deleted {} from zone {}", endpoint, zone.name);
        Ok(())
    }
}

/// Internal wrapper around the Cloudflare API. Provides paged requests and a zone/record cache
/// so that every plan application doesn't re-list the entire account.
struct CloudflareWrapper {
    client: framework::HttpApiClient,
    cache: RwLock<FinderCache>,
}

impl CloudflareWrapper {
    fn paged_request<R>(
        &self,
        page_size: u32,
        request: &mut dyn FnMut(u32) -> ApiResponse<Vec<R>>,
    ) -> ApiResponse<Vec<R>> {
        let mut page_counter = 1;
        let mut response = request(page_counter)?;
        let mut current_size = response.result.len() as u32;

        while current_size >= page_size {
            page_counter += 1;
            match request(page_counter) {
                Ok(r) => {
                    current_size = r.result.len() as u32;
                    let mut previous_results = response.result;
                    response = r;
                    response.result.append(&mut previous_results);
                }
                Err(ApiFailure::Error(code, _)) if code == http::StatusCode::NOT_FOUND => {
                    return Ok(response);
                }
                Err(e) => return Err(e),
            }
        }
        Ok(response)
    }

    fn list_zones(&self) -> ApiResponse<Vec<endpoints::zone::Zone>> {
        self.paged_request(CLOUDFLARE_ZONE_PAGE_SIZE, &mut |page_counter: u32| {
            self.client.request(&endpoints::zone::ListZones {
                params: endpoints::zone::ListZonesParams {
                    page: Some(page_counter),
                    per_page: Some(CLOUDFLARE_ZONE_PAGE_SIZE),
                    ..Default::default()
                },
            })
        })
    }

    fn list_records(&self, zone_id: &str) -> ApiResponse<Vec<endpoints::dns::DnsRecord>> {
        self.paged_request(CLOUDFLARE_RECORD_PAGE_SIZE, &mut |page_counter: u32| {
            self.client.request(&endpoints::dns::ListDnsRecords {
                zone_identifier: zone_id,
                params: endpoints::dns::ListDnsRecordsParams {
                    page: Some(page_counter),
                    per_page: Some(CLOUDFLARE_RECORD_PAGE_SIZE),
                    ..Default::default()
                },
            })
        })
    }

    fn create_record(
        &self,
        zone_id: &str,
        name: &str,
        ttl: u32,
        proxied: Option<bool>,
        content: endpoints::dns::DnsContent,
    ) -> ApiResponse<endpoints::dns::DnsRecord> {
        self.client.request(&endpoints::dns::CreateDnsRecord {
            zone_identifier: zone_id,
            params: endpoints::dns::CreateDnsRecordParams {
                priority: None,
                ttl: Some(ttl),
                proxied,
                name,
                content,
            },
        })
    }

    fn update_record(
        &self,
        zone_id: &str,
        record_id: &str,
        name: &str,
        ttl: u32,
        proxied: Option<bool>,
        content: endpoints::dns::DnsContent,
    ) -> ApiResponse<endpoints::dns::DnsRecord> {
        self.client.request(&endpoints::dns::UpdateDnsRecord {
            zone_identifier: zone_id,
            identifier: record_id,
            params: endpoints::dns::UpdateDnsRecordParams {
                ttl: Some(ttl),
                proxied,
                name,
                content,
            },
        })
    }

    fn delete_record(&self, zone_id: &str, record_id: &str) -> ApiResponse<endpoints::dns::DeleteDnsRecordResponse> {
        self.client.request(&endpoints::dns::DeleteDnsRecord {
            zone_identifier: zone_id,
            identifier: record_id,
        })
    }

    fn try_new(api_token: &str) -> Result<CloudflareWrapper, ProviderError> {
        let api = HttpApiClient::new(
            Credentials::UserAuthToken {
                token: api_token.into(),
            },
            HttpApiClientConfig::default(),
            Environment::Production,
        )
        .map_err(|e| ProviderError::Internal(e.to_string()))?;

        let wrapper = CloudflareWrapper {
            client: api,
            cache: RwLock::new(FinderCache { zones: Vec::new() }),
        };
        let zones = wrapper.list_zones()?.result;
        wrapper.cache.write().expect("cache lock poisoned").zones = zones;
        Ok(wrapper)
    }

    fn cached_zones(&self) -> Vec<Zone> {
        self.cache
            .read()
            .expect("cache lock poisoned")
            .zones
            .iter()
            .map(Zone::from)
            .collect()
    }

    fn find_zone(&self, apex: &str) -> Option<Zone> {
        if let Some(z) = self.cached_zones().into_iter().find(|z| z.name == apex) {
            return Some(z);
        }
        // Cache miss: the zone list may have changed since startup, refresh once.
        if let Ok(fresh) = self.list_zones() {
            self.cache.write().expect("cache lock poisoned").zones = fresh.result;
        }
        self.cached_zones().into_iter().find(|z| z.name == apex)
    }

    fn find_record_id(&self, zone_id: &str, name: &str, record_type: RecordType) -> Option<String> {
        let records = self.list_records(zone_id).ok()?.result;
        records
            .iter()
            .find(|r| r.name == name && matches_type(&r.content, record_type))
            .map(|r| r.id.clone())
    }
}

fn matches_type(content: &endpoints::dns::DnsContent, record_type: RecordType) -> bool {
    matches!(
        (content, record_type),
        (endpoints::dns::DnsContent::A { .. }, RecordType::A)
            | (endpoints::dns::DnsContent::AAAA { .. }, RecordType::Aaaa)
            | (endpoints::dns::DnsContent::CNAME { .. }, RecordType::Cname)
            | (endpoints::dns::DnsContent::TXT { .. }, RecordType::Txt)
    )
}

/// In order to look up record zones and IDs without re-listing the whole account on every
/// call, we cache the zone list. Record lookups (`find_record_id`) are deliberately not cached
/// here - they're only needed on the (infrequent) update/delete path and staleness there would
/// be a correctness problem, not just a performance one.
struct FinderCache {
    zones: Vec<endpoints::zone::Zone>,
}
