use std::path::PathBuf;

use clap::{Args, Parser, Subcommand, ValueHint, builder::BoolishValueParser};

/// Command-line arguments for the persisted-state binary.
#[derive(Debug, Parser)]
#[command(
    name = "persisted-state",
    version,
    about = "Inspect and edit persisted key-value state"
)]
pub struct CliArgs {
    /// Optional path to a configuration file.
    #[arg(
        long = "config-file",
        env = "PERSISTED_STATE_CONFIG_FILE",
        value_name = "PATH",
        value_hint = ValueHint::FilePath
    )]
    pub config_file: Option<PathBuf>,

    #[command(flatten)]
    pub overrides: GlobalOverrides,

    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Debug, Subcommand, Clone)]
pub enum Command {
    /// Print the raw value stored under a key.
    Get(KeyArgs),
    /// Store a raw value under a key.
    Set(SetArgs),
    /// Remove a key through the cache.
    Remove(KeyArgs),
    /// Remove a key from the backend only, bypassing the cache.
    Clear(KeyArgs),
    /// Print the JSON value stored under a key.
    #[command(name = "get-object")]
    GetObject(GetObjectArgs),
    /// Validate and store a JSON value under a key.
    #[command(name = "set-object")]
    SetObject(SetObjectArgs),
    /// Show the cache slot and backend record for a key.
    Inspect(KeyArgs),
    /// Report which backend is in use and whether it accepts writes.
    Probe,
}

#[derive(Debug, Args, Default, Clone)]
pub struct GlobalOverrides {
    /// Override the storage backend (auto|file|memory).
    #[arg(long = "backend", value_name = "KIND", global = true)]
    pub backend: Option<String>,

    /// Override the directory holding the device store.
    #[arg(
        long = "storage-dir",
        value_name = "PATH",
        value_hint = ValueHint::DirPath,
        global = true
    )]
    pub storage_dir: Option<PathBuf>,

    /// Override how undecodable JSON values are reported (surface|warn|silent).
    #[arg(long = "decode-failure", value_name = "POLICY", global = true)]
    pub decode_failure: Option<String>,

    /// Override the base log level (trace|debug|info|warn|error).
    #[arg(long = "log-level", value_name = "LEVEL", global = true)]
    pub log_level: Option<String>,

    /// Toggle JSON logging.
    #[arg(
        long = "log-json",
        value_name = "BOOL",
        value_parser = BoolishValueParser::new(),
        global = true
    )]
    pub log_json: Option<bool>,
}

#[derive(Debug, Args, Clone)]
pub struct KeyArgs {
    #[arg(value_name = "KEY")]
    pub key: String,
}

#[derive(Debug, Args, Clone)]
pub struct SetArgs {
    #[arg(value_name = "KEY")]
    pub key: String,

    #[arg(value_name = "VALUE")]
    pub value: String,
}

#[derive(Debug, Args, Clone)]
pub struct GetObjectArgs {
    #[arg(value_name = "KEY")]
    pub key: String,

    /// JSON printed when the key holds no value.
    #[arg(long, value_name = "JSON", default_value = "null")]
    pub default: String,
}

#[derive(Debug, Args, Clone)]
pub struct SetObjectArgs {
    #[arg(value_name = "KEY")]
    pub key: String,

    /// JSON document to store; `null` removes the key.
    #[arg(value_name = "JSON")]
    pub json: String,
}
