use colored::Colorize;
use ipnet::Ipv4Net;
use serde::Serialize;
use std::{fmt::Display, str::FromStr};
use thiserror::Error;

/// Deployment environment. Every named resource carries it as a suffix so
/// that dev and prod never collide.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, clap::ValueEnum, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Environment {
    Dev,
    Prod,
}

impl Environment {
    pub fn as_str(&self) -> &'static str {
        match self {
            Environment::Dev => "dev",
            Environment::Prod => "prod",
        }
    }

    /// Suffix for logical IDs, which only allow alphanumerics.
    pub fn logical_suffix(&self) -> &'static str {
        match self {
            Environment::Dev => "Dev",
            Environment::Prod => "Prod",
        }
    }

    /// `dify-alb` becomes `dify-alb-dev`.
    pub fn qualify(&self, name: &str) -> String {
        format!("{}-{}", name, self.as_str())
    }

    /// `DifyVPC` becomes `DifyVPCDev`.
    pub fn logical_id(&self, name: &str) -> String {
        format!("{}{}", name, self.logical_suffix())
    }
}

impl Display for Environment {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Error)]
pub enum TopologyError {
    #[error("no environment selected, pass --environment dev|prod")]
    MissingEnvironment,
    #[error("no certificate reference given, refusing to build an HTTP-only edge")]
    MissingCertificate,
    #[error("administrator allow-list is empty, the instance would be unreachable over SSH")]
    EmptyAllowList,
    #[error("administrator range {0} is unrestricted, list specific addresses instead")]
    UnrestrictedManagementAccess(String),
    #[error("need at least 2 availability zones, found {found}")]
    InsufficientZones { found: usize },
    #[error("invalid address range: {0}")]
    InvalidCidr(String),
    #[error("subnet {subnet} is not inside network {network}")]
    SubnetOutOfRange { subnet: String, network: String },
    #[error("subnets {0} and {1} overlap")]
    OverlappingSubnets(String, String),
    #[error("subnet {0} does not belong to the given network")]
    UnknownSubnet(String),
    #[error("perimeter {0} has no rules")]
    EmptyPerimeter(String),
    #[error("unencrypted storage requested, volumes are always encrypted")]
    UnencryptedStorage,
    #[error("resource graph is inconsistent: {}", .0.join("; "))]
    InconsistentGraph(Vec<String>),
    #[error("invalid configuration: {0}")]
    Config(String),
    #[error("cloud provider lookup failed: {0}")]
    Provider(String),
    #[error("failed to render output: {0}")]
    Json(#[from] serde_json::Error),
    #[error("failed to write output: {0}")]
    Io(#[from] std::io::Error),
}

/// IPv4 address range. Host bits must be zero.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Cidr(Ipv4Net);

impl Cidr {
    pub fn prefix(&self) -> u8 {
        self.0.prefix_len()
    }

    pub fn is_unrestricted(&self) -> bool {
        self.prefix() == 0
    }

    pub fn contains(&self, other: &Cidr) -> bool {
        self.0.contains(&other.0)
    }

    /// Blocks either nest or are disjoint.
    pub fn overlaps(&self, other: &Cidr) -> bool {
        self.contains(other) || other.contains(self)
    }
}

impl FromStr for Cidr {
    type Err = TopologyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let net: Ipv4Net = s
            .trim()
            .parse()
            .map_err(|_| TopologyError::InvalidCidr(s.to_string()))?;
        if net.trunc() != net {
            return Err(TopologyError::InvalidCidr(s.to_string()));
        }
        Ok(Cidr(net))
    }
}

impl Display for Cidr {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Severity {
    Ok,
    Warning,
    Critical,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VerificationResult {
    pub message: String,
    pub severity: Severity,
}

impl VerificationResult {
    pub fn ok(message: impl Into<String>) -> Self {
        VerificationResult {
            message: message.into(),
            severity: Severity::Ok,
        }
    }

    pub fn warning(message: impl Into<String>) -> Self {
        VerificationResult {
            message: message.into(),
            severity: Severity::Warning,
        }
    }

    pub fn critical(message: impl Into<String>) -> Self {
        VerificationResult {
            message: message.into(),
            severity: Severity::Critical,
        }
    }
}

impl Display for VerificationResult {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.severity {
            Severity::Ok => f.write_str(&self.message.green().to_string()),
            Severity::Warning => f.write_str(&self.message.yellow().to_string()),
            Severity::Critical => f.write_str(&self.message.red().to_string()),
        }
    }
}

pub trait Verifier {
    fn verify(&self) -> Vec<VerificationResult>;
}
