use config::{Config, ConfigError, Environment, File};
use serde::de::{self, Deserializer, Unexpected, Visitor};
use serde::Deserialize;
use std::fmt;
use std::io;
use std::net::{Ipv4Addr, SocketAddr};
use std::str::FromStr;
use std::time::Duration;

use crate::forwarding::DEFAULT_UPSTREAM_TIMEOUT;
use crate::response::{StaticAnswer, DEFAULT_ANSWER_TTL, DEFAULT_LOCAL_ADDRESS};

/// Prefix of the environment variables which override the
/// configuration file, eg `DNSSHIM_PORT`.
pub const ENV_PREFIX: &str = "DNSSHIM";

pub const DEFAULT_LISTEN_ADDRESS: Ipv4Addr = Ipv4Addr::LOCALHOST;
pub const DEFAULT_PORT: u16 = 2053;

#[derive(Debug, Clone, Eq, PartialEq, Deserialize)]
pub struct Settings {
    #[serde(default = "default_listen_address")]
    pub listen_address: Ipv4Addr,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default)]
    pub resolver: Option<ResolverAddress>,
    #[serde(default = "default_upstream_timeout_secs")]
    pub upstream_timeout_secs: u64,
    #[serde(default = "default_local_address")]
    pub local_address: Ipv4Addr,
    #[serde(default = "default_answer_ttl")]
    pub answer_ttl: u32,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            listen_address: default_listen_address(),
            port: default_port(),
            resolver: None,
            upstream_timeout_secs: default_upstream_timeout_secs(),
            local_address: default_local_address(),
            answer_ttl: default_answer_ttl(),
        }
    }
}

fn default_listen_address() -> Ipv4Addr {
    DEFAULT_LISTEN_ADDRESS
}

fn default_port() -> u16 {
    DEFAULT_PORT
}

fn default_upstream_timeout_secs() -> u64 {
    DEFAULT_UPSTREAM_TIMEOUT.as_secs()
}

fn default_local_address() -> Ipv4Addr {
    DEFAULT_LOCAL_ADDRESS
}

fn default_answer_ttl() -> u32 {
    DEFAULT_ANSWER_TTL
}

impl Settings {
    /// Load settings from an optional YAML file, overridden by
    /// `DNSSHIM_*` environment variables.
    ///
    /// # Errors
    ///
    /// If the file cannot be read, or a value is of the wrong type.
    pub fn new(filename: Option<&str>) -> Result<Self, ConfigError> {
        let mut builder = Config::builder();
        if let Some(filename) = filename {
            builder = builder.add_source(File::with_name(filename));
        }

        builder
            .add_source(Environment::with_prefix(ENV_PREFIX))
            .build()?
            .try_deserialize()
    }

    pub fn upstream_timeout(&self) -> Duration {
        Duration::from_secs(self.upstream_timeout_secs)
    }

    pub fn static_answer(&self) -> StaticAnswer {
        StaticAnswer {
            address: self.local_address,
            ttl: self.answer_ttl,
        }
    }
}

/// An upstream resolver endpoint, written `host:port`.  An IPv6
/// literal host is written in brackets, eg `[::1]:53`.
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct ResolverAddress {
    pub host: String,
    pub port: u16,
}

impl ResolverAddress {
    /// Look the host up, and take the first address.
    ///
    /// # Errors
    ///
    /// If the lookup fails or finds nothing.
    pub async fn resolve(&self) -> Result<SocketAddr, io::Error> {
        tokio::net::lookup_host((self.host.as_str(), self.port))
            .await?
            .next()
            .ok_or_else(|| {
                io::Error::new(
                    io::ErrorKind::NotFound,
                    format!("no addresses found for {}", self.host),
                )
            })
    }
}

impl FromStr for ResolverAddress {
    type Err = ResolverAddressError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let err = || ResolverAddressError {
            address: s.to_string(),
        };

        let (host, port) = s.rsplit_once(':').ok_or_else(err)?;
        let host = match host.strip_prefix('[') {
            Some(bracketed) => bracketed.strip_suffix(']').ok_or_else(err)?,
            None if host.contains(':') => return Err(err()),
            None => host,
        };
        if host.is_empty() {
            return Err(err());
        }
        let port = port.parse().map_err(|_| err())?;

        Ok(Self {
            host: host.to_string(),
            port,
        })
    }
}

impl fmt::Display for ResolverAddress {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        if self.host.contains(':') {
            write!(f, "[{}]:{}", self.host, self.port)
        } else {
            write!(f, "{}:{}", self.host, self.port)
        }
    }
}

impl<'de> Deserialize<'de> for ResolverAddress {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        struct ResolverAddressVisitor;

        impl<'de> Visitor<'de> for ResolverAddressVisitor {
            type Value = ResolverAddress;

            fn expecting(&self, formatter: &mut fmt::Formatter) -> fmt::Result {
                formatter.write_str("a host:port pair")
            }

            fn visit_str<E>(self, v: &str) -> Result<ResolverAddress, E>
            where
                E: de::Error,
            {
                ResolverAddress::from_str(v)
                    .map_err(|_| de::Error::invalid_value(Unexpected::Str(v), &self))
            }
        }

        deserializer.deserialize_str(ResolverAddressVisitor)
    }
}

/// A resolver address is not of the form `host:port`.
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct ResolverAddressError {
    pub address: String,
}

impl fmt::Display for ResolverAddressError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "'{}' is not of the form host:port", self.address)
    }
}

impl std::error::Error for ResolverAddressError {}
