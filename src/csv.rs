//! Command-journal CSV input and balance CSV output for the replay binary.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::io;
use std::path::Path;
use thiserror::Error;

use crate::model::{BookingId, Command, InstanceId, TemplateId, UserId, VenueId};
use crate::Credits;

/// Errors that can occur when parsing csv rows
#[derive(Debug, Error)]
pub enum CsvError {
    #[error("line {line}: failed to parse row: {source}")]
    Parse { line: usize, source: csv::Error },

    #[error("line {line}: unrecognized op '{op}'")]
    UnrecognizedOp { line: usize, op: String },

    #[error("line {line}: {op} missing {field}")]
    MissingField {
        line: usize,
        op: String,
        field: &'static str,
    },
}

#[derive(Debug, Deserialize)]
struct InputRow {
    op: String,
    at: Option<DateTime<Utc>>,
    user: Option<UserId>,
    template: Option<TemplateId>,
    venue: Option<VenueId>,
    instance: Option<InstanceId>,
    booking: Option<BookingId>,
    capacity: Option<u32>,
    amount: Option<i64>,
    key: Option<String>,
}

#[derive(Debug, Serialize)]
struct OutputRow {
    user: UserId,
    balance: String,
}

fn require<T>(
    value: Option<T>,
    line: usize,
    op: &str,
    field: &'static str,
) -> Result<T, CsvError> {
    value.ok_or_else(|| CsvError::MissingField {
        line,
        op: op.to_string(),
        field,
    })
}

/// Read booking commands from a csv journal file
pub fn read_commands(path: impl AsRef<Path>) -> impl Iterator<Item = Result<Command, CsvError>> {
    let reader = csv::ReaderBuilder::new()
        .trim(csv::Trim::All)
        .from_path(path)
        .expect("failed to open csv file");

    reader
        .into_deserialize::<InputRow>()
        .enumerate()
        .map(|(idx, result)| {
            let line = idx + 2; // 1-indexed, skip header
            let row = result.map_err(|source| CsvError::Parse { line, source })?;
            let op = row.op.as_str();
            match op {
                "user" => {
                    let user = require(row.user, line, op, "user")?;
                    Ok(Command::RegisterUser {
                        user,
                        name: format!("user-{user}"),
                    })
                }
                "template" => Ok(Command::RegisterTemplate {
                    template: require(row.template, line, op, "template")?,
                    capacity: require(row.capacity, line, op, "capacity")?,
                    price: Credits::from_minor(require(row.amount, line, op, "amount")?),
                }),
                "venue" => Ok(Command::RegisterVenue {
                    venue: require(row.venue, line, op, "venue")?,
                }),
                "schedule" => Ok(Command::Schedule {
                    instance: require(row.instance, line, op, "instance")?,
                    template: require(row.template, line, op, "template")?,
                    venue: require(row.venue, line, op, "venue")?,
                    start: require(row.at, line, op, "at")?,
                }),
                "topup" => Ok(Command::TopUp {
                    user: require(row.user, line, op, "user")?,
                    amount: Credits::from_minor(require(row.amount, line, op, "amount")?),
                    external_ref: row.key,
                    at: require(row.at, line, op, "at")?,
                }),
                "book" => Ok(Command::Book {
                    user: require(row.user, line, op, "user")?,
                    instance: require(row.instance, line, op, "instance")?,
                    at: require(row.at, line, op, "at")?,
                    idempotency_key: row.key,
                }),
                "approve" => Ok(Command::Approve {
                    booking: require(row.booking, line, op, "booking")?,
                    at: require(row.at, line, op, "at")?,
                }),
                "reject" => Ok(Command::Reject {
                    booking: require(row.booking, line, op, "booking")?,
                    at: require(row.at, line, op, "at")?,
                }),
                "cancel" => Ok(Command::CancelByConsumer {
                    user: require(row.user, line, op, "user")?,
                    booking: require(row.booking, line, op, "booking")?,
                    at: require(row.at, line, op, "at")?,
                }),
                "cancel_business" => Ok(Command::CancelByBusiness {
                    booking: require(row.booking, line, op, "booking")?,
                    rebookable: false,
                    at: require(row.at, line, op, "at")?,
                }),
                "cancel_business_rebookable" => Ok(Command::CancelByBusiness {
                    booking: require(row.booking, line, op, "booking")?,
                    rebookable: true,
                    at: require(row.at, line, op, "at")?,
                }),
                "complete" => Ok(Command::Complete {
                    booking: require(row.booking, line, op, "booking")?,
                    at: require(row.at, line, op, "at")?,
                }),
                "no_show" => Ok(Command::NoShow {
                    booking: require(row.booking, line, op, "booking")?,
                    at: require(row.at, line, op, "at")?,
                }),
                other => Err(CsvError::UnrecognizedOp {
                    line,
                    op: other.to_string(),
                }),
            }
        })
}

/// write user balances to stdout in csv format
pub fn write_balances(balances: impl IntoIterator<Item = (UserId, Credits)>) {
    let stdout = io::stdout();
    let mut writer = csv::Writer::from_writer(stdout.lock());

    for (user, balance) in balances {
        let row = OutputRow {
            user,
            balance: balance.to_string(),
        };
        writer.serialize(&row).expect("failed to write csv row");
    }

    writer.flush().expect("failed to flush csv writer");
}
