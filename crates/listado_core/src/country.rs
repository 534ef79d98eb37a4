use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Marketplace country, selecting the `listado.*` domain to search.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Country {
    Ar,
    Cl,
    Mx,
    Co,
    Pe,
}

impl Country {
    /// Bare marketplace domain, without the `listado.` host prefix.
    pub fn domain(self) -> &'static str {
        match self {
            Country::Ar => "mercadolibre.com.ar",
            Country::Cl => "mercadolibre.cl",
            Country::Mx => "mercadolibre.com.mx",
            Country::Co => "mercadolibre.com.co",
            Country::Pe => "mercadolibre.com.pe",
        }
    }

    /// ISO currency code listings are priced in on this domain.
    pub fn currency(self) -> &'static str {
        match self {
            Country::Ar => "ARS",
            Country::Cl => "CLP",
            Country::Mx => "MXN",
            Country::Co => "COP",
            Country::Pe => "PEN",
        }
    }

    pub fn code(self) -> &'static str {
        match self {
            Country::Ar => "ar",
            Country::Cl => "cl",
            Country::Mx => "mx",
            Country::Co => "co",
            Country::Pe => "pe",
        }
    }

    /// Reverse lookup from a marketplace domain, used by the URL translator.
    pub fn from_domain(domain: &str) -> Option<Self> {
        [
            Country::Ar,
            Country::Cl,
            Country::Mx,
            Country::Co,
            Country::Pe,
        ]
        .into_iter()
        .find(|c| c.domain() == domain)
    }
}

impl FromStr for Country {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "ar" => Ok(Country::Ar),
            "cl" => Ok(Country::Cl),
            "mx" => Ok(Country::Mx),
            "co" => Ok(Country::Co),
            "pe" => Ok(Country::Pe),
            other => Err(format!("unknown country code: {other}")),
        }
    }
}

impl fmt::Display for Country {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}
