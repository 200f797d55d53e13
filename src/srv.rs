//! Seed list discovery for `mongodb+srv` connection strings.

use std::time::Duration;

use crate::{error::Result, options::ServerAddress};

#[derive(Debug)]
pub(crate) struct ResolvedConfig {
    pub(crate) hosts: Vec<ServerAddress>,
    #[allow(dead_code)]
    pub(crate) min_ttl: Duration,
    pub(crate) auth_source: Option<String>,
    pub(crate) replica_set: Option<String>,
}

#[cfg(feature = "dns-resolver")]
pub(crate) use with_resolver::SrvResolver;

#[cfg(feature = "dns-resolver")]
mod with_resolver {
    use hickory_resolver::{
        config::ResolverConfig,
        error::ResolveErrorKind,
        lookup::TxtLookup,
        proto::rr::RData,
        TokioAsyncResolver,
    };

    use super::{Duration, ResolvedConfig, Result, ServerAddress};
    use crate::error::{Error, ErrorKind};

    fn resolve_error(error: impl std::fmt::Display) -> Error {
        ErrorKind::DnsResolve {
            message: error.to_string(),
        }
        .into()
    }

    pub(crate) struct SrvResolver {
        resolver: TokioAsyncResolver,
    }

    impl SrvResolver {
        pub(crate) async fn new() -> Result<Self> {
            let resolver = match TokioAsyncResolver::tokio_from_system_conf() {
                Ok(resolver) => resolver,
                // fall back to well-known public resolvers when no system
                // configuration is readable
                Err(_) => TokioAsyncResolver::tokio(ResolverConfig::default(), Default::default()),
            };

            Ok(Self { resolver })
        }

        pub(crate) async fn resolve_client_options(
            &mut self,
            hostname: &str,
        ) -> Result<ResolvedConfig> {
            let (hosts, min_ttl) = self.get_srv_hosts(hostname).await?;
            let mut config = ResolvedConfig {
                hosts,
                min_ttl,
                auth_source: None,
                replica_set: None,
            };

            self.get_txt_options(hostname, &mut config).await?;

            Ok(config)
        }

        async fn get_srv_hosts(
            &self,
            original_hostname: &str,
        ) -> Result<(Vec<ServerAddress>, Duration)> {
            let hostname_parts: Vec<_> = original_hostname.split('.').collect();

            if hostname_parts.len() < 3 {
                return Err(ErrorKind::InvalidArgument {
                    message: "a 'mongodb+srv' hostname must have at least three '.'-delimited \
                              parts"
                        .into(),
                }
                .into());
            }

            let lookup_hostname = format!("_mongodb._tcp.{}", original_hostname);

            let srv_lookup = self
                .resolver
                .srv_lookup(lookup_hostname.as_str())
                .await
                .map_err(resolve_error)?;
            let mut srv_addresses: Vec<ServerAddress> = Vec::new();
            let mut min_ttl = u32::MAX;

            let domain_name = &hostname_parts[1..];

            for record in srv_lookup.as_lookup().record_iter() {
                let srv = match record.data() {
                    Some(RData::SRV(s)) => s,
                    _ => continue,
                };

                let mut host_parts: Vec<_> = srv.target().to_utf8().split('.').map(str::to_string).collect();

                // remove the empty final section indicating a trailing dot
                if host_parts.last().map(|section| section.is_empty()).unwrap_or(false) {
                    host_parts.pop();
                }

                // returned hosts must be within the queried domain
                if host_parts.len() < 2 || !host_parts[1..].ends_with(domain_name) {
                    return Err(ErrorKind::DnsResolve {
                        message: format!(
                            "SRV lookup for {} returned result {}, which does not match domain \
                             name {}",
                            original_hostname,
                            host_parts.join("."),
                            domain_name.join(".")
                        ),
                    }
                    .into());
                }

                srv_addresses.push(ServerAddress::Tcp {
                    host: host_parts.join("."),
                    port: Some(srv.port()),
                });
                min_ttl = std::cmp::min(min_ttl, record.ttl());
            }

            if srv_addresses.is_empty() {
                return Err(ErrorKind::DnsResolve {
                    message: format!(
                        "SRV lookup for {} returned no records",
                        original_hostname
                    ),
                }
                .into());
            }

            Ok((srv_addresses, Duration::from_secs(min_ttl.into())))
        }

        async fn txt_lookup(&self, hostname: &str) -> Result<Option<TxtLookup>> {
            match self.resolver.txt_lookup(hostname).await {
                Ok(lookup) => Ok(Some(lookup)),
                Err(e) => match e.kind() {
                    ResolveErrorKind::NoRecordsFound { .. } => Ok(None),
                    _ => Err(resolve_error(e)),
                },
            }
        }

        async fn get_txt_options(
            &self,
            original_hostname: &str,
            config: &mut ResolvedConfig,
        ) -> Result<()> {
            let txt_records_response = match self.txt_lookup(original_hostname).await? {
                Some(response) => response,
                None => return Ok(()),
            };
            let mut txt_records = txt_records_response.iter();

            let txt_record = match txt_records.next() {
                Some(record) => record,
                None => return Ok(()),
            };

            if txt_records.next().is_some() {
                return Err(ErrorKind::DnsResolve {
                    message: format!(
                        "TXT lookup for {} returned more than one record, but more than one are \
                         not allowed with 'mongodb+srv'",
                        original_hostname,
                    ),
                }
                .into());
            }

            let txt_data: Vec<_> = txt_record
                .txt_data()
                .iter()
                .map(|bytes| String::from_utf8_lossy(bytes.as_ref()).into_owned())
                .collect();

            let txt_string = txt_data.join("");

            for option_pair in txt_string.split('&') {
                let parts: Vec<_> = option_pair.split('=').collect();

                if parts.len() != 2 {
                    return Err(ErrorKind::DnsResolve {
                        message: format!(
                            "TXT record string '{}' is not a valid `key=value` option pair",
                            option_pair
                        ),
                    }
                    .into());
                }

                match &parts[0].to_lowercase()[..] {
                    "authsource" => {
                        config.auth_source = Some(parts[1].to_string());
                    }
                    "replicaset" => {
                        config.replica_set = Some(parts[1].to_string());
                    }
                    other => {
                        return Err(ErrorKind::DnsResolve {
                            message: format!(
                                "TXT record option '{}' was returned, but only 'authSource' and \
                                 'replicaSet' are allowed",
                                other
                            ),
                        }
                        .into());
                    }
                }
            }

            Ok(())
        }
    }
}

/// Stub implementation when DNS resolution isn't enabled.
#[cfg(not(feature = "dns-resolver"))]
pub(crate) struct SrvResolver {}

#[cfg(not(feature = "dns-resolver"))]
impl SrvResolver {
    pub(crate) async fn new() -> Result<Self> {
        Ok(Self {})
    }

    pub(crate) async fn resolve_client_options(
        &mut self,
        _hostname: &str,
    ) -> Result<ResolvedConfig> {
        Err(crate::error::Error::invalid_argument(
            "mongodb+srv connection strings cannot be used when the 'dns-resolver' feature is \
             disabled",
        ))
    }
}
