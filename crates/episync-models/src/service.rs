use serde::{Deserialize, Serialize};
use std::fmt;

/// The two remote services we reconcile between.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[serde(rename_all = "lowercase")]
pub enum Service {
    Trakt,
    Serializd,
}

impl Service {
    pub fn other(self) -> Service {
        match self {
            Service::Trakt => Service::Serializd,
            Service::Serializd => Service::Trakt,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Service::Trakt => "trakt",
            Service::Serializd => "serializd",
        }
    }
}

impl fmt::Display for Service {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}
