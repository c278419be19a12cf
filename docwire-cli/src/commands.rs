//! Command execution.

use crate::Commands;
use bson::{doc, Bson, Document};
use colored::Colorize;
use docwire_client::{Cursor, Pool};
use docwire_protocol::{DeleteFlags, InsertFlags, UpdateFlags};
use serde_json::Value;

type CommandResult = Result<String, Box<dyn std::error::Error>>;

/// Executes a command and returns the formatted output.
pub async fn execute(pool: &Pool, database: &str, cmd: Commands) -> CommandResult {
    let namespace = |collection: &str| format!("{database}.{collection}");

    match cmd {
        Commands::Ping => {
            let mut conn = pool.lease().await?;
            conn.command(database, &doc! { "ping": 1 }).await?;
            Ok("PONG".green().to_string())
        }

        Commands::Find {
            collection,
            filter,
            sort,
            limit,
            skip,
            batch_size,
            fields,
        } => {
            let query = parse_doc(&filter)?;
            let cursor: Cursor = Cursor::new(pool.clone(), namespace(&collection), query);
            if let Some(sort) = sort {
                cursor.sort(parse_doc(&sort)?)?;
            }
            if let Some(fields) = fields {
                cursor.fields(parse_doc(&fields)?)?;
            }
            cursor.limit(limit)?.skip(skip)?.batch_size(batch_size)?;

            let mut output = String::new();
            let mut count = 0usize;
            while let Some(doc) = cursor.try_next().await? {
                output.push_str(&format_doc(doc));
                output.push('\n');
                count += 1;
            }
            cursor.close().await?;

            output.push_str(&format!("{} document(s)", count).dimmed().to_string());
            Ok(output)
        }

        Commands::Insert {
            collection,
            documents,
        } => {
            let documents = match parse_json_arg(&documents)? {
                Value::Array(items) => items
                    .iter()
                    .map(json_to_doc)
                    .collect::<Result<Vec<_>, _>>()?,
                value => vec![json_to_doc(&value)?],
            };

            let mut conn = pool.lease().await?;
            let stored = conn
                .insert(&namespace(&collection), InsertFlags::new(), &documents)
                .await?;

            let ids: Vec<String> = stored
                .iter()
                .filter_map(|d| d.get("_id"))
                .map(|id| id.to_string())
                .collect();
            Ok(format!(
                "{} {} document(s) into {}\n  _id: {}",
                "Inserted".green(),
                stored.len(),
                collection.cyan(),
                ids.join(", ")
            ))
        }

        Commands::Update {
            collection,
            selector,
            update,
            upsert,
            multi,
        } => {
            let mut flags = UpdateFlags::new();
            if upsert {
                flags = flags.with_upsert();
            }
            if multi {
                flags = flags.with_multi();
            }

            let mut conn = pool.lease().await?;
            conn.update(
                &namespace(&collection),
                flags,
                &parse_doc(&selector)?,
                &parse_doc(&update)?,
            )
            .await?;
            Ok(format!("{} {}", "Updated".green(), collection.cyan()))
        }

        Commands::Remove {
            collection,
            selector,
            single,
        } => {
            let flags = if single {
                DeleteFlags::new().with_single_remove()
            } else {
                DeleteFlags::new()
            };

            let mut conn = pool.lease().await?;
            conn.delete(&namespace(&collection), flags, &parse_doc(&selector)?)
                .await?;
            Ok(format!("{} from {}", "Removed".green(), collection.cyan()))
        }

        Commands::Command { command } => {
            let mut conn = pool.lease().await?;
            let result = conn.command(database, &parse_doc(&command)?).await?;
            Ok(format_doc(result))
        }
    }
}

/// Parses a JSON argument (either inline JSON or @file.json).
fn parse_json_arg(arg: &str) -> Result<Value, Box<dyn std::error::Error>> {
    if let Some(path) = arg.strip_prefix('@') {
        let content = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&content)?)
    } else {
        Ok(serde_json::from_str(arg)?)
    }
}

fn parse_doc(arg: &str) -> Result<Document, Box<dyn std::error::Error>> {
    json_to_doc(&parse_json_arg(arg)?)
}

fn json_to_doc(value: &Value) -> Result<Document, Box<dyn std::error::Error>> {
    if !value.is_object() {
        return Err(format!("expected a JSON object, got {value}").into());
    }
    Ok(bson::to_document(value)?)
}

/// Formats a document as relaxed extended JSON.
fn format_doc(doc: Document) -> String {
    let value = Bson::Document(doc).into_relaxed_extjson();
    serde_json::to_string_pretty(&value).unwrap_or_else(|_| value.to_string())
}
