//! Clear-sky solar radiation estimate. Gives each reading a "potential
//! solar watts" figure for its station's coordinates and time, which the
//! REST layer pairs with measured radiation to show cloud attenuation.

use chrono::{DateTime, Datelike, Duration, NaiveDate, Timelike, Utc};

/// Solar constant at the top of the atmosphere, W/m².
const SOLAR_CONSTANT: f64 = 1353.0;

/// Solar declination in degrees for a day of the year.
fn declination_deg(day_of_year: u32) -> f64 {
    23.45 * (360.0 / 365.0 * (284.0 + day_of_year as f64)).to_radians().sin()
}

/// Sun elevation above the horizon in degrees. Solar time is approximated
/// from longitude alone; the equation-of-time correction is under ±4° of
/// hour angle and disappears into the clear-sky model's own tolerance.
fn elevation_deg(latitude: f64, longitude: f64, at: DateTime<Utc>) -> f64 {
    let declination = declination_deg(at.ordinal()).to_radians();
    let solar_hours = at.hour() as f64
        + at.minute() as f64 / 60.0
        + at.second() as f64 / 3600.0
        + longitude / 15.0;
    let hour_angle = ((solar_hours - 12.0) * 15.0).to_radians();
    let lat = latitude.to_radians();
    let sin_elevation =
        lat.sin() * declination.sin() + lat.cos() * declination.cos() * hour_angle.cos();
    sin_elevation.asin().to_degrees()
}

/// Clear-sky global irradiance on a horizontal surface, W/m². Zero when
/// the sun is below the horizon. Uses the Meinel air-mass attenuation
/// model with the standard altitude correction.
pub fn potential_solar_watts(
    latitude: f64,
    longitude: f64,
    altitude_m: f64,
    at: DateTime<Utc>,
) -> f64 {
    let elevation = elevation_deg(latitude, longitude, at);
    if elevation <= 0.0 {
        return 0.0;
    }
    let zenith = (90.0 - elevation).to_radians();
    // Kasten-Young air mass stays finite near the horizon.
    let air_mass = 1.0
        / (zenith.cos() + 0.50572 * (96.07995 - zenith.to_degrees()).powf(-1.6364));
    let altitude_km = (altitude_m / 1000.0).max(0.0);
    let direct = SOLAR_CONSTANT
        * ((1.0 - 0.14 * altitude_km) * 0.7f64.powf(air_mass.powf(0.678)) + 0.14 * altitude_km);
    // Horizontal component of the direct beam plus a flat diffuse share.
    let horizontal = direct * (90.0f64 - zenith.to_degrees()).to_radians().sin().max(0.0);
    (horizontal * 1.1).max(0.0)
}

/// Civil sunrise and sunset (UTC) for a site and date, from the same
/// declination/hour-angle model as the irradiance estimate. `None` above
/// the polar circles on days the sun never crosses the horizon.
pub fn sun_times(
    latitude: f64,
    longitude: f64,
    date: NaiveDate,
) -> Option<(DateTime<Utc>, DateTime<Utc>)> {
    let declination = declination_deg(date.ordinal()).to_radians();
    let lat = latitude.to_radians();
    // Refraction-corrected zenith of 90.833 degrees.
    let cos_hour_angle = (90.833f64.to_radians().cos() - lat.sin() * declination.sin())
        / (lat.cos() * declination.cos());
    if !(-1.0..=1.0).contains(&cos_hour_angle) {
        return None;
    }
    let half_day_hours = cos_hour_angle.acos().to_degrees() / 15.0;
    let solar_noon_utc = 12.0 - longitude / 15.0;
    let midnight = date.and_hms_opt(0, 0, 0)?.and_utc();
    let at = |hours: f64| midnight + Duration::seconds((hours * 3600.0).round() as i64);
    Some((
        at(solar_noon_utc - half_day_hours),
        at(solar_noon_utc + half_day_hours),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn night_is_zero() {
        // Local midnight at Greenwich on the equator.
        let midnight = Utc.with_ymd_and_hms(2024, 3, 20, 0, 0, 0).unwrap();
        assert_eq!(potential_solar_watts(0.0, 0.0, 0.0, midnight), 0.0);
    }

    #[test]
    fn equinox_noon_at_equator_is_near_full_sun() {
        let noon = Utc.with_ymd_and_hms(2024, 3, 20, 12, 0, 0).unwrap();
        let watts = potential_solar_watts(0.0, 0.0, 0.0, noon);
        assert!(watts > 900.0 && watts < 1250.0, "got {watts}");
    }

    #[test]
    fn altitude_raises_clear_sky_output() {
        let noon = Utc.with_ymd_and_hms(2024, 6, 21, 19, 0, 0).unwrap();
        // Denver (105 W): 19:00 UTC is local solar noon.
        let sea_level = potential_solar_watts(39.7, -105.0, 0.0, noon);
        let mile_high = potential_solar_watts(39.7, -105.0, 1609.0, noon);
        assert!(mile_high > sea_level, "{mile_high} vs {sea_level}");
    }

    #[test]
    fn winter_sun_is_weaker_than_summer_sun() {
        let summer = Utc.with_ymd_and_hms(2024, 6, 21, 19, 0, 0).unwrap();
        let winter = Utc.with_ymd_and_hms(2024, 12, 21, 19, 0, 0).unwrap();
        let summer_watts = potential_solar_watts(39.7, -105.0, 1609.0, summer);
        let winter_watts = potential_solar_watts(39.7, -105.0, 1609.0, winter);
        assert!(summer_watts > winter_watts * 1.5, "{summer_watts} vs {winter_watts}");
    }

    #[test]
    fn equinox_day_at_the_equator_splits_evenly() {
        let date = NaiveDate::from_ymd_opt(2024, 3, 20).unwrap();
        let (sunrise, sunset) = sun_times(0.0, 0.0, date).unwrap();
        assert_eq!(sunrise.hour(), 5, "got {sunrise}");
        assert_eq!(sunset.hour(), 18, "got {sunset}");
        let daylight = sunset - sunrise;
        assert!(daylight > Duration::hours(12));
        assert!(daylight < Duration::minutes(12 * 60 + 30));
    }

    #[test]
    fn longitude_shifts_solar_noon() {
        let date = NaiveDate::from_ymd_opt(2024, 6, 21).unwrap();
        // Denver: solar noon near 19:00 UTC.
        let (sunrise, sunset) = sun_times(39.7, -105.0, date).unwrap();
        let midpoint = sunrise + (sunset - sunrise) / 2;
        assert_eq!(midpoint.hour(), 19, "got {midpoint}");
        assert!(sunset - sunrise > Duration::hours(14), "june daylight");
    }

    #[test]
    fn polar_extremes_have_no_sunrise() {
        let midwinter = NaiveDate::from_ymd_opt(2024, 12, 21).unwrap();
        assert_eq!(sun_times(78.0, 15.0, midwinter), None);
        let midsummer = NaiveDate::from_ymd_opt(2024, 6, 21).unwrap();
        assert_eq!(sun_times(78.0, 15.0, midsummer), None);
    }

    #[test]
    fn declination_peaks_at_solstices() {
        let june = declination_deg(172);
        let december = declination_deg(355);
        assert!((june - 23.45).abs() < 0.5, "got {june}");
        assert!((december + 23.45).abs() < 0.5, "got {december}");
    }
}
