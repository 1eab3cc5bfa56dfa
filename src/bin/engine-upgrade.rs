//! Standalone upgrade pass (SPEC_FULL.md SS6): reopens every B-tree
//! relation found under a database's storage directory and runs
//! `am::btree::upgrade::upgrade_relation` against it once.

use ordered_store::am::btree::upgrade::upgrade_relation;
use ordered_store::storage::RelFileRef;
use ordered_store::{DBConfig, OID, DB};

use std::{env, path::PathBuf, process};

fn usage() -> ! {
    eprintln!("usage: engine-upgrade <root-path> <rel-id>...");
    process::exit(2);
}

fn main() {
    env_logger::init();

    let mut args = env::args().skip(1);
    let root_path: PathBuf = match args.next() {
        Some(path) => PathBuf::from(path),
        None => usage(),
    };

    let rel_ids: Vec<OID> = args
        .map(|arg| {
            arg.parse().unwrap_or_else(|_| {
                eprintln!("invalid relation id: {}", arg);
                process::exit(2);
            })
        })
        .collect();

    if rel_ids.is_empty() {
        usage();
    }

    let config = DBConfig::new().root_path(&root_path);
    let db = DB::open(config).unwrap_or_else(|e| {
        eprintln!("could not open database at {}: {}", root_path.display(), e);
        process::exit(1);
    });

    for rel_id in rel_ids {
        let rel_ref = RelFileRef { db: 0, rel_id };
        match upgrade_relation(db.get_storage_manager(), rel_ref) {
            Ok(rewritten) => {
                log::info!("relation {} upgraded, {} pages rewritten", rel_id, rewritten);
            }
            Err(e) => {
                eprintln!("failed to upgrade relation {}: {}", rel_id, e);
                process::exit(1);
            }
        }
    }
}
