//! CLI smoke entry point.
//!
//! # Responsibility
//! - Verify `contentstore_core` linkage with a deterministic probe.
//! - Optionally open a store file and print active entity counts per type.
//!
//! Usage: `contentstore_cli [DB_PATH] [LOG_DIR]`

use contentstore_core::repo::entity_repo::{EntityRepository, SqliteEntityRepository};
use contentstore_core::repo::ensure_store_connection_ready;
use contentstore_core::{core_version, default_log_level, init_logging, open_db, ping};
use log::error;
use std::env;
use std::error::Error;
use std::process::ExitCode;

fn main() -> ExitCode {
    println!("contentstore_core ping={}", ping());
    println!("contentstore_core version={}", core_version());

    let mut args = env::args().skip(1);
    let Some(db_path) = args.next() else {
        return ExitCode::SUCCESS;
    };
    if let Some(log_dir) = args.next() {
        if let Err(err) = init_logging(default_log_level(), &log_dir) {
            eprintln!("logging disabled: {err}");
        }
    }

    match print_type_counts(&db_path) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            error!("event=cli_counts module=cli status=error error={err}");
            eprintln!("error: {err}");
            ExitCode::FAILURE
        }
    }
}

fn print_type_counts(db_path: &str) -> Result<(), Box<dyn Error>> {
    let conn = open_db(db_path)?;
    ensure_store_connection_ready(&conn)?;

    let counts = SqliteEntityRepository::new(&conn).count_by_type()?;
    if counts.is_empty() {
        println!("no active entities");
    }
    for (kind, count) in counts {
        println!("{kind}={count}");
    }
    Ok(())
}
