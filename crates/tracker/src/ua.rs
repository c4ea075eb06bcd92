//! User agent and location collaborators.

use woothee::parser::Parser;

/// Client properties derived from a user agent string.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ParsedUserAgent {
    pub browser: String,
    pub browser_version: String,
    pub os: String,
    pub os_version: String,
    pub desktop: bool,
    pub mobile: bool,
    /// Known crawler. Hits from crawlers are not tracked.
    pub crawler: bool,
}

pub trait UserAgentParser: Send + Sync {
    fn parse(&self, user_agent: &str) -> ParsedUserAgent;
}

/// Parser backed by woothee.
pub struct WootheeParser {
    parser: Parser,
}

impl WootheeParser {
    pub fn new() -> Self {
        Self {
            parser: Parser::new(),
        }
    }
}

impl Default for WootheeParser {
    fn default() -> Self {
        Self::new()
    }
}

fn known(value: &str) -> String {
    if value.is_empty() || value == "UNKNOWN" {
        String::new()
    } else {
        value.to_string()
    }
}

impl UserAgentParser for WootheeParser {
    fn parse(&self, user_agent: &str) -> ParsedUserAgent {
        if user_agent.is_empty() {
            return ParsedUserAgent::default();
        }

        match self.parser.parse(user_agent) {
            Some(result) => ParsedUserAgent {
                browser: known(result.name),
                browser_version: known(result.version),
                os: known(result.os),
                os_version: known(&result.os_version),
                // woothee categories: pc, smartphone, mobilephone, crawler, appliance, misc
                desktop: result.category == "pc",
                mobile: matches!(result.category, "smartphone" | "mobilephone"),
                crawler: result.category == "crawler",
            },
            None => ParsedUserAgent::default(),
        }
    }
}

/// Location of an IP address.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Location {
    pub country_code: String,
    pub city: String,
}

pub trait GeoLookup: Send + Sync {
    fn lookup(&self, ip: &str) -> Option<Location>;
}

/// Lookup that never resolves a location.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoGeoLookup;

impl GeoLookup for NoGeoLookup {
    fn lookup(&self, _ip: &str) -> Option<Location> {
        None
    }
}
