//! Geolocation lookup. Private address ranges short-circuit before ever consulting the backend;
//! everything else is delegated to a [`GeoLookup`] implementation, kept behind a trait so a
//! missing or unreadable database degrades gracefully instead of being fatal mid-run (see the
//! configuration error-handling rule: only startup failures of the GeoIP path are fatal).

use std::net::IpAddr;

use crate::event::Geo;

pub trait GeoLookup: Send + Sync {
    /// Resolves `ip` to a location, or an error reason understood by [`Geo::Error`].
    fn lookup(&self, ip: IpAddr) -> Result<ResolvedLocation, &'static str>;
}

pub struct ResolvedLocation {
    pub country: String,
    pub country_code: String,
    pub city: Option<String>,
    pub latitude: f64,
    pub longitude: f64,
    pub accuracy_radius: Option<u16>,
}

/// Resolves `ip` against private/reserved ranges first, then `lookup`. Never blocks on network:
/// `lookup` implementations are expected to consult an already-loaded in-memory database.
pub fn resolve(ip: IpAddr, lookup: &dyn GeoLookup) -> Geo {
    if is_private(ip) {
        return Geo::Error {
            error: "private".to_owned(),
        };
    }

    match lookup.lookup(ip) {
        Ok(loc) => Geo::Resolved {
            country: loc.country,
            country_code: loc.country_code,
            city: loc.city,
            latitude: loc.latitude,
            longitude: loc.longitude,
            accuracy_radius: loc.accuracy_radius,
        },
        Err(reason) => Geo::Error {
            error: reason.to_owned(),
        },
    }
}

/// RFC 1918 + loopback + link-local short-circuit, covering both IPv4 and IPv6.
fn is_private(ip: IpAddr) -> bool {
    match ip {
        IpAddr::V4(v4) => v4.is_private() || v4.is_loopback() || v4.is_link_local() || v4.is_unspecified(),
        IpAddr::V6(v6) => {
            v6.is_loopback()
                || v6.is_unspecified()
                || v6.to_ipv4_mapped().map(IpAddr::V4).is_some_and(is_private)
                || (v6.segments()[0] & 0xfe00) == 0xfc00 // unique local fc00::/7
                || (v6.segments()[0] & 0xffc0) == 0xfe80 // link-local fe80::/10
        }
    }
}

/// `GeoLookup` backed by a MaxMind GeoLite2-City-format database, loaded once at startup.
pub struct MaxMindGeoLookup {
    reader: maxminddb::Reader<Vec<u8>>,
}

impl MaxMindGeoLookup {
    pub fn open(path: &camino::Utf8Path) -> anyhow::Result<Self> {
        let reader = maxminddb::Reader::open_readfile(path.as_std_path())?;
        Ok(Self { reader })
    }
}

impl GeoLookup for MaxMindGeoLookup {
    fn lookup(&self, ip: IpAddr) -> Result<ResolvedLocation, &'static str> {
        let city: maxminddb::geoip2::City<'_> = self.reader.lookup(ip).map_err(|_| "lookup_failed")?;

        let country_name = city
            .country
            .as_ref()
            .and_then(|c| c.names.as_ref())
            .and_then(|names| names.get("en").copied())
            .unwrap_or("unknown")
            .to_owned();
        let country_code = city
            .country
            .as_ref()
            .and_then(|c| c.iso_code)
            .unwrap_or("??")
            .to_owned();
        let city_name = city
            .city
            .as_ref()
            .and_then(|c| c.names.as_ref())
            .and_then(|names| names.get("en").copied())
            .map(ToOwned::to_owned);
        let location = city.location.as_ref();

        let (latitude, longitude) = location
            .and_then(|loc| Some((loc.latitude?, loc.longitude?)))
            .ok_or("coordinates_unavailable")?;

        Ok(ResolvedLocation {
            country: country_name,
            country_code,
            city: city_name,
            latitude,
            longitude,
            accuracy_radius: location.and_then(|loc| loc.accuracy_radius),
        })
    }
}

/// Fallback used when `GEOIP_DB_PATH` is unset or the database failed to load; every lookup
/// degrades to `{geo.error: "unavailable"}` per the error-handling design.
pub struct NullGeoLookup;

impl GeoLookup for NullGeoLookup {
    fn lookup(&self, _ip: IpAddr) -> Result<ResolvedLocation, &'static str> {
        Err("unavailable")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rfc1918_and_loopback_are_private() {
        assert!(is_private("192.168.1.1".parse().unwrap()));
        assert!(is_private("10.0.0.1".parse().unwrap()));
        assert!(is_private("172.16.0.1".parse().unwrap()));
        assert!(is_private("127.0.0.1".parse().unwrap()));
        assert!(is_private("169.254.1.1".parse().unwrap()));
        assert!(is_private("::1".parse().unwrap()));
        assert!(is_private("fc00::1".parse().unwrap()));
        assert!(is_private("fe80::1".parse().unwrap()));
    }

    #[test]
    fn public_address_is_not_private() {
        assert!(!is_private("8.8.8.8".parse().unwrap()));
    }

    #[test]
    fn private_ip_short_circuits_before_lookup() {
        let geo = resolve("192.168.1.1".parse().unwrap(), &NullGeoLookup);
        match geo {
            Geo::Error { error } => assert_eq!(error, "private"),
            Geo::Resolved { .. } => panic!("expected private-address error"),
        }
    }

    #[test]
    fn missing_backend_degrades_to_unavailable() {
        let geo = resolve("8.8.8.8".parse().unwrap(), &NullGeoLookup);
        match geo {
            Geo::Error { error } => assert_eq!(error, "unavailable"),
            Geo::Resolved { .. } => panic!("expected unavailable error"),
        }
    }
}
