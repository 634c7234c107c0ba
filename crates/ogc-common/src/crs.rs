//! Coordinate Reference System identifiers and axis order.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

const OGC_CRS_PREFIX: &str = "http://www.opengis.net/def/crs/";

/// CRS identifiers understood by the query core.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum CrsCode {
    /// WGS84 geographic, longitude/latitude axis order (OGC CRS84)
    Crs84,
    /// WGS84 geographic, latitude/longitude axis order
    Epsg4326,
    /// NAD83 geographic, latitude/longitude axis order
    Epsg4269,
    /// Web Mercator (meters, spherical)
    Epsg3857,
    /// World Mercator (meters, WGS84 ellipsoid)
    Epsg3395,
    /// WGS84 / UTM zone, EPSG:326xx (north) or EPSG:327xx (south)
    Utm { zone: u8, north: bool },
}

impl CrsCode {
    /// Parse a CRS identifier.
    ///
    /// Accepts formats like:
    /// - "http://www.opengis.net/def/crs/OGC/1.3/CRS84"
    /// - "http://www.opengis.net/def/crs/EPSG/0/4326"
    /// - "urn:ogc:def:crs:EPSG::4326"
    /// - "EPSG:4326" / "epsg:4326"
    /// - "CRS:84" / "OGC:CRS84"
    pub fn parse(s: &str) -> Result<Self, CrsParseError> {
        let trimmed = s.trim();
        let upper = trimmed.to_uppercase();

        if let Some(rest) = trimmed.strip_prefix(OGC_CRS_PREFIX) {
            let parts: Vec<&str> = rest.split('/').collect();
            return match parts.as_slice() {
                ["OGC", _, "CRS84"] => Ok(CrsCode::Crs84),
                ["EPSG", _, code] => Self::from_epsg_str(code, s),
                _ => Err(CrsParseError::UnsupportedCrs(s.to_string())),
            };
        }

        if let Some(code) = upper.strip_prefix("URN:OGC:DEF:CRS:EPSG:") {
            let code = code.trim_start_matches(':').rsplit(':').next().unwrap_or("");
            return Self::from_epsg_str(code, s);
        }
        if upper == "URN:OGC:DEF:CRS:OGC:1.3:CRS84" {
            return Ok(CrsCode::Crs84);
        }

        match upper.as_str() {
            "CRS:84" | "CRS84" | "OGC:CRS84" => Ok(CrsCode::Crs84),
            _ => match upper.strip_prefix("EPSG:") {
                Some(code) => Self::from_epsg_str(code, s),
                None => Err(CrsParseError::UnsupportedCrs(s.to_string())),
            },
        }
    }

    fn from_epsg_str(code: &str, original: &str) -> Result<Self, CrsParseError> {
        let code: u32 = code
            .trim()
            .parse()
            .map_err(|_| CrsParseError::InvalidIdentifier(original.to_string()))?;
        Self::from_epsg(code).ok_or_else(|| CrsParseError::UnsupportedCrs(original.to_string()))
    }

    /// Look up a CRS by EPSG code.
    pub fn from_epsg(code: u32) -> Option<Self> {
        match code {
            4326 => Some(CrsCode::Epsg4326),
            4269 => Some(CrsCode::Epsg4269),
            3857 | 900913 => Some(CrsCode::Epsg3857),
            3395 => Some(CrsCode::Epsg3395),
            32601..=32660 => Some(CrsCode::Utm {
                zone: (code - 32600) as u8,
                north: true,
            }),
            32701..=32760 => Some(CrsCode::Utm {
                zone: (code - 32700) as u8,
                north: false,
            }),
            _ => None,
        }
    }

    /// EPSG code, `None` for CRS84.
    pub fn epsg(&self) -> Option<u32> {
        match self {
            CrsCode::Crs84 => None,
            CrsCode::Epsg4326 => Some(4326),
            CrsCode::Epsg4269 => Some(4269),
            CrsCode::Epsg3857 => Some(3857),
            CrsCode::Epsg3395 => Some(3395),
            CrsCode::Utm { zone, north: true } => Some(32600 + *zone as u32),
            CrsCode::Utm { zone, north: false } => Some(32700 + *zone as u32),
        }
    }

    /// SRID used when talking to spatial databases.
    pub fn srid(&self) -> i32 {
        self.epsg().unwrap_or(4326) as i32
    }

    /// Canonical OGC URI for this CRS.
    pub fn uri(&self) -> String {
        match self.epsg() {
            None => format!("{}OGC/1.3/CRS84", OGC_CRS_PREFIX),
            Some(code) => format!("{}EPSG/0/{}", OGC_CRS_PREFIX, code),
        }
    }

    /// Authority axis order of this CRS.
    ///
    /// - CRS84: lon, lat (x, y)
    /// - EPSG geographic CRSs: lat, lon (y, x)
    /// - Projected CRSs here: easting, northing (x, y)
    pub fn axis_order(&self) -> AxisOrder {
        match self {
            CrsCode::Epsg4326 | CrsCode::Epsg4269 => AxisOrder::LatLon,
            _ => AxisOrder::XY,
        }
    }

    /// Check if this is a geographic (lat/lon) CRS.
    pub fn is_geographic(&self) -> bool {
        matches!(
            self,
            CrsCode::Crs84 | CrsCode::Epsg4326 | CrsCode::Epsg4269
        )
    }
}

impl Default for CrsCode {
    fn default() -> Self {
        CrsCode::Crs84
    }
}

impl fmt::Display for CrsCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.uri())
    }
}

impl FromStr for CrsCode {
    type Err = CrsParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl TryFrom<String> for CrsCode {
    type Error = CrsParseError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<CrsCode> for String {
    fn from(code: CrsCode) -> Self {
        code.uri()
    }
}

/// Axis order for coordinate interpretation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AxisOrder {
    /// X (longitude/easting), Y (latitude/northing)
    XY,
    /// Y (latitude/northing), X (longitude/easting)
    LatLon,
}

impl AxisOrder {
    /// Convert a coordinate pair given in this axis order to (x, y).
    pub fn to_xy(&self, a: f64, b: f64) -> (f64, f64) {
        match self {
            AxisOrder::XY => (a, b),
            AxisOrder::LatLon => (b, a),
        }
    }

    /// Convert an (x, y) pair into this axis order.
    pub fn from_xy(&self, x: f64, y: f64) -> (f64, f64) {
        // the swap is its own inverse
        self.to_xy(x, y)
    }
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum CrsParseError {
    #[error("Unsupported CRS: {0}")]
    UnsupportedCrs(String),

    #[error("Malformed CRS identifier: {0}")]
    InvalidIdentifier(String),
}
