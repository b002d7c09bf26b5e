//! Validation and filtering of raw records.
//!
//! Everything here is pure: callers own all counter updates.

use chrono::NaiveDate;

use crate::error::ValidationError;

use super::{Amount, Classification, FilteredRecord, RawRecord, col};

/// Minimum drop percentage (inclusive) for a record to be persisted.
pub const QUALIFYING_DROP_PERCENT: f64 = 50.0;

const DATE_FORMAT: &str = "%Y-%m-%d";

/// Percentage by which `balance` sits below `avg_balance`, floored at zero.
///
/// Undefined (`None`) when the average is missing or zero. The difference
/// is taken in `i128` since two parseable amounts can be `i64::MAX` apart.
pub fn drop_percentage(balance: Amount, avg_balance: Option<Amount>) -> Option<f64> {
    let avg = avg_balance?.minor();
    if avg == 0 {
        return None;
    }
    let diff = i128::from(avg) - i128::from(balance.minor());
    let drop = diff as f64 * 100.0 / avg as f64;
    Some(drop.max(0.0))
}

/// Parse, validate and filter one record.
pub fn classify(raw: &RawRecord) -> Classification {
    match parse(raw) {
        Ok(Some(record)) => Classification::Qualifies(Box::new(record)),
        Ok(None) => Classification::DoesNotQualify,
        Err(e) => Classification::Invalid(e),
    }
}

fn parse(raw: &RawRecord) -> Result<Option<FilteredRecord>, ValidationError> {
    let periode = date(raw, col::PERIODE, "periode")?;
    let main_branch = text(raw, col::MAIN_BRANCH, "main_branch")?;
    let branch = text(raw, col::BRANCH, "branch")?;
    let cif = text(raw, col::CIF, "cif")?;
    let norek = text(raw, col::NOREK, "norek")?;
    let account_type = text(raw, col::TYPE, "type")?;
    let nama = text(raw, col::NAMA, "nama")?;
    let pn_pengelola = text(raw, col::PN_PENGELOLA, "pn_pengelola")?;
    let balance = amount(raw, col::BALANCE, "balance")?;
    let aval_balance = text(raw, col::AVAL_BALANCE, "aval_balance")?;
    let avg_balance = optional_amount(raw, col::AVG_BALANCE, "avg_balance")?;
    let open_date = date(raw, col::OPEN_DATE, "open_date")?;

    let Some(drop) = drop_percentage(balance, avg_balance) else {
        return Ok(None);
    };
    if drop < QUALIFYING_DROP_PERCENT {
        return Ok(None);
    }

    Ok(Some(FilteredRecord {
        line: raw.line,
        periode,
        main_branch,
        branch,
        cif,
        norek,
        account_type,
        nama,
        pn_pengelola,
        balance,
        aval_balance,
        avg_balance: avg_balance.unwrap_or(Amount::ZERO),
        open_date,
        drop_percentage: drop,
    }))
}

fn required<'a>(
    raw: &'a RawRecord,
    index: usize,
    field: &'static str,
) -> Result<&'a str, ValidationError> {
    let value = raw.field(index);
    if value.is_empty() {
        return Err(ValidationError::MissingField { field });
    }
    Ok(value)
}

fn text(raw: &RawRecord, index: usize, field: &'static str) -> Result<String, ValidationError> {
    required(raw, index, field).map(str::to_string)
}

fn date(raw: &RawRecord, index: usize, field: &'static str) -> Result<NaiveDate, ValidationError> {
    let value = required(raw, index, field)?;
    NaiveDate::parse_from_str(value, DATE_FORMAT).map_err(|_| ValidationError::InvalidDate {
        field,
        value: value.to_string(),
    })
}

fn amount(raw: &RawRecord, index: usize, field: &'static str) -> Result<Amount, ValidationError> {
    let value = required(raw, index, field)?;
    Amount::parse(value).ok_or_else(|| ValidationError::InvalidAmount {
        field,
        value: value.to_string(),
    })
}

fn optional_amount(
    raw: &RawRecord,
    index: usize,
    field: &'static str,
) -> Result<Option<Amount>, ValidationError> {
    let value = raw.field(index);
    if value.is_empty() {
        return Ok(None);
    }
    Amount::parse(value)
        .map(Some)
        .ok_or_else(|| ValidationError::InvalidAmount {
            field,
            value: value.to_string(),
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row(balance: &str, avg: &str) -> RawRecord {
        RawRecord::new(
            1,
            [
                "2025-01-31",
                "KANWIL JAKARTA",
                "00123",
                "CIF0001",
                "0123456789",
                "TAB",
                "Budi Santoso",
                "PN00042",
                balance,
                "1,000",
                avg,
                "2019-06-15",
            ]
            .iter()
            .map(|s| s.to_string())
            .collect(),
        )
    }

    fn units(n: i64) -> Amount {
        Amount::from_units(n)
    }

    #[test]
    fn test_drop_percentage_examples() {
        let avg = Some(units(1_000_000));
        assert_eq!(drop_percentage(units(400_000), avg), Some(60.0));
        assert_eq!(drop_percentage(units(500_000), avg), Some(50.0));
        assert_eq!(drop_percentage(units(600_000), avg), Some(40.0));

        let just_under = drop_percentage(units(500_001), avg).unwrap();
        assert!((just_under - 49.9999).abs() < 1e-9);
    }

    #[test]
    fn test_drop_percentage_never_negative() {
        assert_eq!(
            drop_percentage(units(2_000_000), Some(units(1_000_000))),
            Some(0.0)
        );
    }

    #[test]
    fn test_drop_percentage_undefined_without_average() {
        assert_eq!(drop_percentage(units(10), None), None);
        assert_eq!(drop_percentage(units(10), Some(Amount::ZERO)), None);
    }

    #[test]
    fn test_negative_average_uses_the_formula() {
        assert_eq!(
            drop_percentage(Amount::ZERO, Some(units(-1_000_000))),
            Some(100.0)
        );
        assert_eq!(
            drop_percentage(units(-500_000), Some(units(-1_000_000))),
            Some(50.0)
        );
        assert_eq!(
            drop_percentage(units(-2_000_000), Some(units(-1_000_000))),
            Some(0.0)
        );
        assert!(matches!(
            classify(&row("0", "-1,000,000")),
            Classification::Qualifies(_)
        ));
    }

    #[test]
    fn test_extreme_amounts_do_not_overflow() {
        let drop = drop_percentage(
            Amount::from_minor(i64::MIN + 1),
            Some(Amount::from_minor(i64::MAX)),
        )
        .unwrap();
        assert!((drop - 200.0).abs() < 1e-6);

        let drop = drop_percentage(
            units(-92_233_720_368_547_758),
            Some(units(92_233_720_368_547_758)),
        )
        .unwrap();
        assert!((drop - 200.0).abs() < 1e-6);
    }

    #[test]
    fn test_qualifying_boundary_is_inclusive() {
        match classify(&row("500,000", "1,000,000")) {
            Classification::Qualifies(record) => {
                assert_eq!(record.drop_percentage, 50.0);
                assert_eq!(record.balance, units(500_000));
                assert_eq!(record.account_type, "TAB");
            }
            other => panic!("expected qualifying record, got {other:?}"),
        }
        assert_eq!(
            classify(&row("500,001", "1,000,000")),
            Classification::DoesNotQualify
        );
        assert!(matches!(
            classify(&row("400,000", "1,000,000")),
            Classification::Qualifies(_)
        ));
    }

    #[test]
    fn test_missing_or_zero_average_skips_without_error() {
        assert_eq!(classify(&row("0", "")), Classification::DoesNotQualify);
        assert_eq!(classify(&row("0", "0")), Classification::DoesNotQualify);
        assert_eq!(classify(&row("0", "  ")), Classification::DoesNotQualify);
    }

    #[test]
    fn test_invalid_fields() {
        assert_eq!(
            classify(&row("12x", "1,000")),
            Classification::Invalid(ValidationError::InvalidAmount {
                field: "balance",
                value: "12x".to_string()
            })
        );
        assert!(matches!(
            classify(&row("1", "n/a")),
            Classification::Invalid(ValidationError::InvalidAmount {
                field: "avg_balance",
                ..
            })
        ));

        let mut bad_date = row("1", "100");
        bad_date.fields[0] = "31/01/2025".to_string();
        assert!(matches!(
            classify(&bad_date),
            Classification::Invalid(ValidationError::InvalidDate {
                field: "periode",
                ..
            })
        ));

        let mut missing = row("1", "100");
        missing.fields[6] = " ".to_string();
        assert_eq!(
            classify(&missing),
            Classification::Invalid(ValidationError::MissingField { field: "nama" })
        );
    }
}
