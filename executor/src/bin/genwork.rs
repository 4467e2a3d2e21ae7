//! Appends synthetic `Work` records to a `FileWorkStorage` root, for seeding
//! local runs and fixtures without a real job queue in front of them.
//!
//! Unlike the reference generator this is not driven from a schema: the body
//! is taken verbatim from `--body`, since pulling in a schema-driven fake-data
//! generator is unwarranted for what is otherwise a thin fixture tool.

use std::collections::HashMap;
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use clap::Parser;
use exec_common::codec::marshal_with_size;
use exec_common::http_method::HttpMethod;
use exec_common::model::{Input, Work};
use uuid::Uuid;

#[derive(Parser)]
#[command(about = "Appends generated work records to a storage root")]
struct Args {
    /// Number of records to generate.
    #[arg(short = 'n', long, default_value_t = 1)]
    count: usize,

    /// Storage root, matching FileWorkStorage's `root`.
    #[arg(long = "storepath")]
    store_path: PathBuf,

    #[arg(long = "taskID")]
    task_id: Uuid,

    #[arg(long = "sectionID")]
    section_id: Uuid,

    #[arg(long)]
    method: String,

    #[arg(long)]
    path: String,

    /// Comma-separated key=value pairs.
    #[arg(long)]
    headers: Option<String>,

    /// Path to a file used verbatim as every generated record's body.
    #[arg(long)]
    body: Option<PathBuf>,

    #[arg(long = "templateID")]
    template_id: Option<Uuid>,

    #[arg(long, default_value_t = 100)]
    timeout_ms: u64,
}

fn main() {
    let args = Args::parse();

    let method = HttpMethod::from_str(&args.method)
        .unwrap_or_else(|e| panic!("invalid --method: {e}"));

    let headers = args
        .headers
        .as_deref()
        .map(parse_headers)
        .unwrap_or_default();

    let body = args
        .body
        .as_deref()
        .map(|p| fs::read(p).unwrap_or_else(|e| panic!("reading {}: {e}", p.display())))
        .unwrap_or_default();

    let section_dir = args
        .store_path
        .join(args.task_id.to_string())
        .join(args.section_id.to_string());
    fs::create_dir_all(&section_dir)
        .unwrap_or_else(|e| panic!("creating {}: {e}", section_dir.display()));

    let mut file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(section_dir.join("work.bin"))
        .unwrap_or_else(|e| panic!("opening work.bin: {e}"));

    for _ in 0..args.count {
        let work = Work {
            id: Uuid::new_v4(),
            input: Input {
                method,
                path: args.path.clone(),
                headers: headers.clone(),
                body: body.clone(),
            },
            timeout: Duration::from_millis(args.timeout_ms),
            template_id: args.template_id,
            expected_value: None,
        };

        let encoded = marshal_with_size(&work).expect("serializing work record");
        file.write_all(&encoded).expect("writing work record");
    }
}

fn parse_headers(raw: &str) -> HashMap<String, String> {
    raw.split(',')
        .map(|pair| {
            let (k, v) = pair
                .split_once('=')
                .unwrap_or_else(|| panic!("malformed header pair: {pair}"));
            (k.to_owned(), v.to_owned())
        })
        .collect()
}
