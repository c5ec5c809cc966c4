//! Unit conversions shared by drivers, sinks, and uploaders.

pub fn fahrenheit_to_celsius(f: f64) -> f64 {
    (f - 32.0) * 5.0 / 9.0
}

pub fn celsius_to_fahrenheit(c: f64) -> f64 {
    c * 9.0 / 5.0 + 32.0
}

pub fn in_hg_to_hpa(in_hg: f64) -> f64 {
    in_hg * 33.8639
}

/// Millibars and hectopascals are the same unit; APRS speaks millibars.
pub fn in_hg_to_millibars(in_hg: f64) -> f64 {
    in_hg_to_hpa(in_hg)
}

pub fn mph_to_knots(mph: f64) -> f64 {
    mph * 0.868976
}

pub fn mph_to_mps(mph: f64) -> f64 {
    mph * 0.44704
}

pub fn mm_to_inches(mm: f64) -> f64 {
    mm / 25.4
}

/// NWS wind chill. Defined for temperatures at or below 50 °F with wind
/// above 3 mph; outside that range it is the air temperature.
pub fn wind_chill_f(temp_f: f64, wind_mph: f64) -> f64 {
    if temp_f > 50.0 || wind_mph <= 3.0 {
        return temp_f;
    }
    let v = wind_mph.powf(0.16);
    35.74 + 0.6215 * temp_f - 35.75 * v + 0.4275 * temp_f * v
}

/// NWS heat index (Rothfusz regression). Defined for temperatures at or
/// above 80 °F; below that it is the air temperature.
pub fn heat_index_f(temp_f: f64, humidity: f64) -> f64 {
    if temp_f < 80.0 {
        return temp_f;
    }
    let t = temp_f;
    let r = humidity;
    -42.379 + 2.04901523 * t + 10.14333127 * r
        - 0.22475541 * t * r
        - 6.83783e-3 * t * t
        - 5.481717e-2 * r * r
        + 1.22874e-3 * t * t * r
        + 8.5282e-4 * t * r * r
        - 1.99e-6 * t * t * r * r
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn temperature_conversions_invert() {
        assert!((fahrenheit_to_celsius(32.0)).abs() < 1e-9);
        assert!((celsius_to_fahrenheit(100.0) - 212.0).abs() < 1e-9);
        assert!((celsius_to_fahrenheit(fahrenheit_to_celsius(72.5)) - 72.5).abs() < 1e-9);
    }

    #[test]
    fn pressure_and_speed_scales() {
        assert!((in_hg_to_hpa(29.92) - 1013.21).abs() < 0.1);
        assert!((mph_to_knots(10.0) - 8.68976).abs() < 1e-6);
        assert!((mm_to_inches(25.4) - 1.0).abs() < 1e-9);
    }

    #[test]
    fn wind_chill_only_applies_when_cold_and_windy() {
        assert_eq!(wind_chill_f(60.0, 20.0), 60.0);
        assert_eq!(wind_chill_f(30.0, 2.0), 30.0);
        let chill = wind_chill_f(30.0, 20.0);
        assert!(chill < 20.0 && chill > 10.0, "got {chill}");
    }

    #[test]
    fn heat_index_only_applies_when_hot() {
        assert_eq!(heat_index_f(75.0, 90.0), 75.0);
        let index = heat_index_f(90.0, 70.0);
        assert!(index > 100.0 && index < 110.0, "got {index}");
    }
}
