//! Dumps a storage root's work records as JSON, one `input`/`expected` pair
//! per line, for inspecting fixtures without standing up a full job.

use std::collections::HashMap;
use std::fs::File;
use std::io::BufReader;
use std::path::PathBuf;

use clap::Parser;
use exec_common::codec::Decoder;
use exec_common::model::{Template, Work};
use uuid::Uuid;

#[derive(Parser)]
#[command(about = "Dumps a storage root's work records as JSON")]
struct Args {
    #[arg(long = "taskID")]
    task_id: Uuid,

    #[arg(long = "sectionID")]
    section_id: Uuid,

    /// Storage root, matching FileWorkStorage's `root`.
    #[arg(long = "loc", default_value = "./")]
    location: PathBuf,
}

fn main() {
    let args = Args::parse();
    let section_dir = args
        .location
        .join(args.task_id.to_string())
        .join(args.section_id.to_string());

    let templates = read_templates(&section_dir.join("templates.bin"));

    let file = File::open(section_dir.join("work.bin"))
        .unwrap_or_else(|e| panic!("opening work.bin: {e}"));
    let mut decoder = Decoder::new(BufReader::new(file));

    while let Some(work) = decoder.decode::<Work>().expect("decoding work record") {
        print_record(&work, &templates);
    }
}

fn read_templates(path: &std::path::Path) -> HashMap<Uuid, Template> {
    let Ok(file) = File::open(path) else {
        return HashMap::new();
    };
    let mut decoder = Decoder::new(BufReader::new(file));
    let mut templates = HashMap::new();
    while let Some(template) = decoder
        .decode::<Template>()
        .expect("decoding template record")
    {
        templates.insert(template.id, template);
    }
    templates
}

fn print_record(work: &Work, templates: &HashMap<Uuid, Template>) {
    let input = serde_json::to_string(&work.input).expect("serializing input");
    println!("input: {input}");

    let expected = match work.template_id {
        Some(template_id) => {
            let schema_table = templates
                .get(&template_id)
                .map(|t| &t.schema_table);
            serde_json::to_string(&schema_table).expect("serializing schema table")
        }
        None => serde_json::to_string(&work.expected_value).expect("serializing expected value"),
    };
    println!("expected: {expected}");
}
