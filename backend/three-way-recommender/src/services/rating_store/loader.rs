use super::{DatasetError, RatingBounds, RatingStore, Result};
use crate::models::{ItemId, UserId};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::path::Path;
use tokio::fs::File;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, BufReader};
use tracing::info;

/// Placeholder for "not rated" in the dense format.
pub const MISSING_RATING: f64 = 99.0;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RatingFormat {
    /// One tab-separated line per user; column 0 is a count column.
    #[default]
    Dense,
    /// `user,item,rating` lines grouped by user.
    Triples,
}

/// Reads a dataset from disk. Either the whole file parses or nothing is returned.
pub async fn load(path: &Path, format: RatingFormat, bounds: RatingBounds) -> Result<RatingStore> {
    let file = File::open(path).await.map_err(|source| DatasetError::DataLoad {
        path: path.to_path_buf(),
        source,
    })?;
    let reader = BufReader::new(file);

    let parsed = match format {
        RatingFormat::Dense => parse_dense(reader, bounds).await,
        RatingFormat::Triples => parse_triples(reader, bounds).await,
    };

    let store = parsed.map_err(|err| match err {
        DatasetError::Read(source) => DatasetError::DataLoad {
            path: path.to_path_buf(),
            source,
        },
        other => other,
    })?;

    info!(
        path = %path.display(),
        format = ?format,
        users = store.num_users(),
        items = store.num_items(),
        ratings = store.num_ratings(),
        "Loaded rating dataset"
    );
    Ok(store)
}

pub async fn parse_dense<R>(reader: R, bounds: RatingBounds) -> Result<RatingStore>
where
    R: AsyncBufRead + Unpin,
{
    let mut lines = reader.lines();
    let mut users: Vec<Vec<(ItemId, f64)>> = Vec::new();
    let mut expected_columns: Option<usize> = None;
    let mut line_no = 0usize;

    while let Some(line) = lines.next_line().await? {
        line_no += 1;
        let line = line.trim();
        if line.is_empty() {
            continue;
        }

        let fields: Vec<&str> = line.split('\t').map(str::trim).collect();
        match expected_columns {
            None => {
                if fields.len() < 2 {
                    return Err(DatasetError::DataFormat {
                        line: line_no,
                        reason: "expected a count column followed by item ratings".to_string(),
                    });
                }
                expected_columns = Some(fields.len());
            }
            Some(expected) if expected != fields.len() => {
                return Err(DatasetError::DataFormat {
                    line: line_no,
                    reason: format!("expected {} columns, found {}", expected, fields.len()),
                });
            }
            Some(_) => {}
        }

        let mut ratings = Vec::new();
        // column 0 is the per-row count
        for (column, field) in fields.iter().enumerate().skip(1) {
            let rating = parse_rating(field, line_no)?;
            if rating == MISSING_RATING {
                continue;
            }
            check_bounds(rating, bounds, line_no)?;
            ratings.push((column - 1, rating));
        }
        users.push(ratings);
    }

    let num_items = expected_columns.map(|c| c - 1).unwrap_or(0);
    RatingStore::from_user_ratings(users, num_items, bounds)
}

pub async fn parse_triples<R>(reader: R, bounds: RatingBounds) -> Result<RatingStore>
where
    R: AsyncBufRead + Unpin,
{
    let mut lines = reader.lines();
    let mut users: Vec<Vec<(ItemId, f64)>> = Vec::new();
    let mut num_items = 0usize;
    let mut last_user: Option<UserId> = None;
    let mut current_items: BTreeSet<ItemId> = BTreeSet::new();
    let mut line_no = 0usize;

    while let Some(line) = lines.next_line().await? {
        line_no += 1;
        let line = line.trim();
        if line.is_empty() {
            continue;
        }

        let fields: Vec<&str> = line.split(',').map(str::trim).collect();
        if fields.len() != 3 {
            return Err(DatasetError::DataFormat {
                line: line_no,
                reason: format!("expected 3 fields (user,item,rating), found {}", fields.len()),
            });
        }

        let user = parse_id(fields[0], "user", line_no)?;
        let item = parse_id(fields[1], "item", line_no)?;
        let rating = parse_rating(fields[2], line_no)?;
        check_bounds(rating, bounds, line_no)?;

        if let Some(previous) = last_user {
            if user < previous {
                return Err(DatasetError::DataFormat {
                    line: line_no,
                    reason: format!("user {} appears after user {}", user, previous),
                });
            }
        }
        if last_user != Some(user) {
            current_items.clear();
        }
        if !current_items.insert(item) {
            return Err(DatasetError::DataFormat {
                line: line_no,
                reason: format!("user {} rates item {} twice", user, item),
            });
        }
        last_user = Some(user);

        if users.len() <= user {
            users.resize_with(user + 1, Vec::new);
        }
        users[user].push((item, rating));
        num_items = num_items.max(item + 1);
    }

    RatingStore::from_user_ratings(users, num_items, bounds)
}

fn parse_id(field: &str, what: &str, line: usize) -> Result<usize> {
    field.parse::<usize>().map_err(|e| DatasetError::DataFormat {
        line,
        reason: format!("invalid {} id {:?}: {}", what, field, e),
    })
}

fn parse_rating(field: &str, line: usize) -> Result<f64> {
    match field.parse::<f64>() {
        Ok(value) if value.is_finite() => Ok(value),
        Ok(value) => Err(DatasetError::DataFormat {
            line,
            reason: format!("rating {} is not finite", value),
        }),
        Err(e) => Err(DatasetError::DataFormat {
            line,
            reason: format!("invalid rating {:?}: {}", field, e),
        }),
    }
}

fn check_bounds(rating: f64, bounds: RatingBounds, line: usize) -> Result<()> {
    if bounds.contains(rating) {
        Ok(())
    } else {
        Err(DatasetError::DataFormat {
            line,
            reason: format!(
                "rating {} outside [{}, {}]",
                rating, bounds.lower, bounds.upper
            ),
        })
    }
}
