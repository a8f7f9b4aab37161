//! Derived service fields: absolute dates from the contract signature date
//! plus year offsets, and the budget allocation from the parent's total
//! capital expenditure.

use chrono::{Datelike, NaiveDate};
use rust_decimal::prelude::FromPrimitive;
use rust_decimal::{Decimal, RoundingStrategy};

use crate::model::{RegistrationRecord, ServiceRecord};

/// Adds calendar years. Feb 29 falls back to Feb 28 when the target year is
/// not a leap year; `None` only on calendar overflow.
pub fn add_years(date: NaiveDate, years: i32) -> Option<NaiveDate> {
    let year = date.year().checked_add(years)?;
    date.with_year(year)
        .or_else(|| NaiveDate::from_ymd_opt(year, 2, 28))
}

/// Fills a service's derived fields from its parent registration.
///
/// Start/end dates are computed when the parent has a signature date and the
/// service carries the matching year offset. The computed budget
/// (`total_capex` x `capex_share`, rounded to 2 decimal places) takes
/// precedence over any budget value supplied in the source row. With no
/// parent the record is left untouched; the caller treats that as an
/// unresolved reference.
pub fn derive_service(service: &mut ServiceRecord, parent: Option<&RegistrationRecord>) {
    let Some(parent) = parent else { return };
    if let Some(signed) = parent.signature_date {
        if let Some(offset) = service.start_offset_years {
            service.start_date = add_years(signed, offset);
        }
        if let Some(offset) = service.end_offset_years {
            service.end_date = add_years(signed, offset);
        }
    }
    if let (Some(share), Some(total)) = (service.capex_share, parent.total_capex) {
        if let Some(share) = Decimal::from_f64(share) {
            service.service_budget = Some(
                (total * share).round_dp_with_strategy(2, RoundingStrategy::MidpointAwayFromZero),
            );
        }
    }
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{RegistrationKey, ServiceKey};

    fn ymd(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    fn parent(capex: Option<&str>, signed: Option<NaiveDate>) -> RegistrationRecord {
        RegistrationRecord {
            key: RegistrationKey {
                port_zone: "Porto X".to_string(),
                state_code: "SP".to_string(),
                concession_object: "Dredging".to_string(),
            },
            contract_kind: "Concessão".to_string(),
            total_capex: capex.map(|c| c.parse().unwrap()),
            signature_date: signed,
            description: None,
            easting: None,
            northing: None,
            utm_zone: None,
        }
    }

    fn service() -> ServiceRecord {
        ServiceRecord {
            key: ServiceKey {
                registration: RegistrationKey {
                    port_zone: "Porto X".to_string(),
                    state_code: "SP".to_string(),
                    concession_object: "Dredging".to_string(),
                },
                service_type: "Dredging works".to_string(),
                phase: "Phase 1".to_string(),
                service_name: "Deepening".to_string(),
                description: String::new(),
            },
            start_offset_years: None,
            start_date: None,
            end_offset_years: None,
            end_date: None,
            schedule_source: None,
            capex_share: None,
            service_budget: None,
            share_source: None,
        }
    }

    #[test]
    fn test_add_years_plain() {
        assert_eq!(add_years(ymd(2020, 3, 15), 2), Some(ymd(2022, 3, 15)));
    }

    #[test]
    fn test_add_years_leap_day_falls_back() {
        assert_eq!(add_years(ymd(2020, 2, 29), 1), Some(ymd(2021, 2, 28)));
        assert_eq!(add_years(ymd(2020, 2, 29), 4), Some(ymd(2024, 2, 29)));
    }

    #[test]
    fn test_derive_dates_from_offsets() {
        let mut svc = service();
        svc.start_offset_years = Some(1);
        svc.end_offset_years = Some(3);
        derive_service(&mut svc, Some(&parent(None, Some(ymd(2020, 3, 15)))));
        assert_eq!(svc.start_date, Some(ymd(2021, 3, 15)));
        assert_eq!(svc.end_date, Some(ymd(2023, 3, 15)));
    }

    #[test]
    fn test_derive_keeps_supplied_date_without_offset() {
        let mut svc = service();
        svc.start_date = Some(ymd(2022, 1, 1));
        derive_service(&mut svc, Some(&parent(None, Some(ymd(2020, 3, 15)))));
        assert_eq!(svc.start_date, Some(ymd(2022, 1, 1)));
    }

    #[test]
    fn test_derive_budget_from_share() {
        let mut svc = service();
        svc.capex_share = Some(0.125);
        derive_service(&mut svc, Some(&parent(Some("1000000.00"), None)));
        assert_eq!(svc.service_budget, Some("125000.00".parse().unwrap()));
    }

    #[test]
    fn test_derived_budget_overrides_supplied_value() {
        let mut svc = service();
        svc.capex_share = Some(0.5);
        svc.service_budget = Some("1.00".parse().unwrap());
        derive_service(&mut svc, Some(&parent(Some("1000000.00"), None)));
        assert_eq!(svc.service_budget, Some("500000.00".parse().unwrap()));
    }

    #[test]
    fn test_no_parent_leaves_record_unmodified() {
        let mut svc = service();
        svc.start_offset_years = Some(1);
        svc.capex_share = Some(0.5);
        derive_service(&mut svc, None);
        assert_eq!(svc.start_date, None);
        assert_eq!(svc.service_budget, None);
    }

    #[test]
    fn test_no_signature_date_leaves_dates_unset() {
        let mut svc = service();
        svc.start_offset_years = Some(1);
        derive_service(&mut svc, Some(&parent(Some("100.00"), None)));
        assert_eq!(svc.start_date, None);
    }
}
