//! CLI commands executed against a persistence engine.

use std::io::Write;

use serde_json::{Value, json};
use tracing::{debug, info};

use crate::cache::{PersistenceEngine, SlotState};
use crate::config::{Command, Settings};
use crate::infra::error::InfraError;
use crate::object::{DecodeFailurePolicy, ObjectState};
use crate::storage::{PROBE_KEY, SelectedBackend};

use super::error::AppError;

/// Everything a command needs: the engine, its object view and how the
/// backend was chosen.
#[derive(Debug, Clone)]
pub struct CommandContext {
    engine: PersistenceEngine,
    objects: ObjectState,
    fell_back: bool,
}

impl CommandContext {
    pub fn new(selected: SelectedBackend, settings: &Settings) -> Self {
        let engine = PersistenceEngine::new(selected.backend);
        let mut context = Self::from_engine(engine, settings.objects.decode_failure);
        context.fell_back = selected.fell_back;
        context
    }

    pub fn from_engine(engine: PersistenceEngine, policy: DecodeFailurePolicy) -> Self {
        Self {
            objects: ObjectState::new(engine.clone()).with_policy(policy),
            engine,
            fell_back: false,
        }
    }

    pub fn engine(&self) -> &PersistenceEngine {
        &self.engine
    }
}

/// Run `command`, writing its output to `out`.
pub async fn execute<W: Write>(
    context: &CommandContext,
    command: Command,
    out: &mut W,
) -> Result<(), AppError> {
    debug!(command = ?command, "executing command");
    match command {
        Command::Get(args) => {
            let value = context
                .engine
                .get_raw(&args.key)
                .await?
                .ok_or_else(|| AppError::not_found(&args.key))?;
            emit(out, &value)
        }
        Command::Set(args) => {
            context
                .engine
                .write(&args.key, Some(args.value))
                .await?;
            info!(key = %args.key, "value stored");
            Ok(())
        }
        Command::Remove(args) => {
            context.engine.write(&args.key, None).await?;
            info!(key = %args.key, "value removed");
            Ok(())
        }
        Command::Clear(args) => {
            context.engine.clear_key(&args.key).await?;
            info!(key = %args.key, "key cleared from backend");
            Ok(())
        }
        Command::GetObject(args) => {
            let default = parse_json("--default", &args.default)?;
            let value: Value = context.objects.read_object(&args.key, default).await?;
            emit(out, &value.to_string())
        }
        Command::SetObject(args) => {
            let value = parse_json("JSON", &args.json)?;
            let op = if value.is_null() {
                context.objects.write_object::<Value>(&args.key, None)?
            } else {
                context.objects.write_object(&args.key, Some(&value))?
            };
            op.await?;
            info!(key = %args.key, "object stored");
            Ok(())
        }
        Command::Inspect(args) => {
            let before = context.engine.slot_state(&args.key);
            let cached = context.engine.get_raw(&args.key).await?;
            let stored = context.engine.storage().get_item(&args.key).await?;
            let report = json!({
                "key": args.key,
                "backend": context.engine.storage().name(),
                "slot_before": describe_slot(&before),
                "cached": cached,
                "stored": stored,
                "subscribers": context.engine.subscriber_count(&args.key),
            });
            emit(out, &report.to_string())
        }
        Command::Probe => {
            let storage = context.engine.storage();
            storage.set_item(PROBE_KEY, PROBE_KEY).await?;
            let echoed = storage.get_item(PROBE_KEY).await?;
            storage.remove_item(PROBE_KEY).await?;

            let report = json!({
                "backend": storage.name(),
                "fell_back": context.fell_back,
                "writable": echoed.as_deref() == Some(PROBE_KEY),
            });
            emit(out, &report.to_string())
        }
    }
}

fn parse_json(field: &str, text: &str) -> Result<Value, AppError> {
    serde_json::from_str(text)
        .map_err(|err| AppError::validation(format!("{field} is not valid JSON: {err}")))
}

fn describe_slot(state: &SlotState) -> Value {
    match state {
        SlotState::Unloaded => json!("unloaded"),
        SlotState::Pending(load_id) => json!({ "pending": load_id }),
        SlotState::Resolved(value) => json!({ "resolved": value }),
    }
}

fn emit<W: Write>(out: &mut W, line: &str) -> Result<(), AppError> {
    writeln!(out, "{line}").map_err(InfraError::from)?;
    Ok(())
}
