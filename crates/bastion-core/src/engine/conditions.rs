use std::net::IpAddr;

use chrono::{Datelike, FixedOffset, Local, Timelike, Utc};

use crate::models::policy::{AccessConditions, IpRestriction, TimeRestriction};

/// Wall-clock hour and weekday in the zone access windows are written for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LocalMoment {
    pub hour: u32,
    /// 0 = Sunday.
    pub weekday: u32,
}

/// Source of the current time for time-restricted resources.
pub trait Clock: Send + Sync {
    fn now(&self) -> LocalMoment;
}

/// Server local time.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> LocalMoment {
        let now = Local::now();
        LocalMoment {
            hour: now.hour(),
            weekday: now.weekday().num_days_from_sunday(),
        }
    }
}

/// A fixed UTC offset, independent of the host's zone.
#[derive(Debug, Clone, Copy)]
pub struct OffsetClock(pub FixedOffset);

impl OffsetClock {
    pub fn from_minutes(minutes: i32) -> Option<Self> {
        FixedOffset::east_opt(minutes * 60).map(OffsetClock)
    }
}

impl Clock for OffsetClock {
    fn now(&self) -> LocalMoment {
        let now = Utc::now().with_timezone(&self.0);
        LocalMoment {
            hour: now.hour(),
            weekday: now.weekday().num_days_from_sunday(),
        }
    }
}

/// Always reports the same moment.
#[derive(Debug, Clone, Copy)]
pub struct FrozenClock(pub LocalMoment);

impl Clock for FrozenClock {
    fn now(&self) -> LocalMoment {
        self.0
    }
}

/// Evaluate a resource's access conditions for a caller. Returns the reason
/// for the first failing condition.
pub fn evaluate(
    conditions: &AccessConditions,
    role_name: &str,
    ip: Option<IpAddr>,
    now: LocalMoment,
) -> Result<(), String> {
    if !conditions.allowed_roles.is_empty()
        && !conditions.allowed_roles.iter().any(|r| r == role_name)
    {
        return Err("Your role is not allowed to access this resource".to_string());
    }

    if conditions.denied_roles.iter().any(|r| r == role_name) {
        return Err("Your role is restricted from accessing this resource".to_string());
    }

    if let Some(time) = conditions.time_restricted.as_ref().filter(|t| t.enabled) {
        check_time(time, now)?;
    }

    if let Some(ip_rule) = conditions.ip_restricted.as_ref().filter(|r| r.enabled) {
        check_ip(ip_rule, ip)?;
    }

    Ok(())
}

fn check_time(rule: &TimeRestriction, now: LocalMoment) -> Result<(), String> {
    if let Some(hours) = rule.allowed_hours {
        if now.hour < hours.start || now.hour > hours.end {
            return Err(format!(
                "This resource is only accessible between {}:00 and {}:00",
                hours.start, hours.end
            ));
        }
    }
    if !rule.allowed_days.is_empty() && !rule.allowed_days.contains(&now.weekday) {
        return Err("This resource is not accessible today".to_string());
    }
    Ok(())
}

/// Deny-list first, then allow-list. Entries that do not parse as IP
/// addresses never match. A caller without a known address fails a
/// non-empty allow-list.
fn check_ip(rule: &IpRestriction, ip: Option<IpAddr>) -> Result<(), String> {
    let listed = |list: &[String]| {
        ip.is_some_and(|ip| {
            list.iter()
                .filter_map(|entry| entry.trim().parse::<IpAddr>().ok())
                .any(|entry| entry == ip)
        })
    };

    if listed(&rule.denied_ips) {
        return Err("Access denied from your IP address".to_string());
    }
    if !rule.allowed_ips.is_empty() && !listed(&rule.allowed_ips) {
        return Err("Access denied from your IP address".to_string());
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::policy::HourRange;

    fn at(hour: u32, weekday: u32) -> LocalMoment {
        LocalMoment { hour, weekday }
    }

    fn office_hours() -> AccessConditions {
        AccessConditions {
            time_restricted: Some(TimeRestriction {
                enabled: true,
                allowed_hours: Some(HourRange { start: 9, end: 17 }),
                allowed_days: vec![1, 2, 3, 4, 5],
            }),
            ..Default::default()
        }
    }

    #[test]
    fn test_hour_window_is_inclusive() {
        let c = office_hours();
        assert!(evaluate(&c, "staff", None, at(9, 1)).is_ok());
        assert!(evaluate(&c, "staff", None, at(17, 1)).is_ok());
        assert!(evaluate(&c, "staff", None, at(8, 1)).is_err());
        assert!(evaluate(&c, "staff", None, at(20, 1)).is_err());
    }

    #[test]
    fn test_day_mask() {
        let c = office_hours();
        assert!(evaluate(&c, "staff", None, at(10, 0)).is_err());
        assert!(evaluate(&c, "staff", None, at(10, 5)).is_ok());
    }

    #[test]
    fn test_disabled_time_rule_is_ignored() {
        let mut c = office_hours();
        if let Some(t) = c.time_restricted.as_mut() {
            t.enabled = false;
        }
        assert!(evaluate(&c, "staff", None, at(23, 0)).is_ok());
    }

    #[test]
    fn test_role_lists() {
        let c = AccessConditions {
            allowed_roles: vec!["hr".into(), "admin".into()],
            denied_roles: vec!["admin".into()],
            ..Default::default()
        };
        assert!(evaluate(&c, "hr", None, at(12, 3)).is_ok());
        assert!(evaluate(&c, "staff", None, at(12, 3)).is_err());
        assert!(evaluate(&c, "admin", None, at(12, 3)).is_err());
    }

    #[test]
    fn test_ip_lists() {
        let c = AccessConditions {
            ip_restricted: Some(IpRestriction {
                enabled: true,
                allowed_ips: vec!["10.0.0.5".into(), "::1".into()],
                denied_ips: vec!["10.0.0.9".into()],
            }),
            ..Default::default()
        };
        let ip = |s: &str| Some(s.parse::<IpAddr>().unwrap());
        assert!(evaluate(&c, "r", ip("10.0.0.5"), at(0, 0)).is_ok());
        assert!(evaluate(&c, "r", ip("::1"), at(0, 0)).is_ok());
        assert!(evaluate(&c, "r", ip("10.0.0.9"), at(0, 0)).is_err());
        assert!(evaluate(&c, "r", ip("10.0.0.6"), at(0, 0)).is_err());
        assert!(evaluate(&c, "r", None, at(0, 0)).is_err());
    }

    #[test]
    fn test_offset_clock_bounds() {
        assert!(OffsetClock::from_minutes(330).is_some());
        assert!(OffsetClock::from_minutes(24 * 60).is_none());
    }
}
