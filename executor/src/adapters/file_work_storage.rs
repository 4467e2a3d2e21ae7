//! `WorkStorage` over a local directory of length-prefixed record files, one
//! per `(task_id, section_id)`, using the codec in `exec_common::codec`.
//!
//! Layout: `<root>/<task_id>/<section_id>/templates.bin` and `.../work.bin`,
//! each a concatenation of records as produced by the `genwork` binary.

use std::collections::HashMap;
use std::io::BufReader;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use exec_common::codec::Decoder;
use exec_common::interfaces::WorkStorage;
use exec_common::model::{Template, Work};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

pub struct FileWorkStorage {
    root: PathBuf,
}

impl FileWorkStorage {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn section_dir(&self, task_id: Uuid, section_id: Uuid) -> PathBuf {
        self.root.join(task_id.to_string()).join(section_id.to_string())
    }
}

#[async_trait]
impl WorkStorage for FileWorkStorage {
    async fn fetch_templates(
        &self,
        task_id: Uuid,
        section_id: Uuid,
    ) -> Result<HashMap<Uuid, Template>, String> {
        let path = self.section_dir(task_id, section_id).join("templates.bin");

        tokio::task::spawn_blocking(move || read_all_templates(&path))
            .await
            .map_err(|e| e.to_string())?
    }

    fn stream(
        &self,
        cancel: CancellationToken,
        task_id: Uuid,
        section_id: Uuid,
    ) -> (mpsc::Receiver<Work>, mpsc::Receiver<String>) {
        let path = self.section_dir(task_id, section_id).join("work.bin");
        let (work_tx, work_rx) = mpsc::channel(32);
        let (err_tx, err_rx) = mpsc::channel(1);

        tokio::task::spawn_blocking(move || stream_work(&path, cancel, work_tx, err_tx));

        (work_rx, err_rx)
    }
}

fn read_all_templates(path: &Path) -> Result<HashMap<Uuid, Template>, String> {
    let file = std::fs::File::open(path).map_err(|e| format!("opening {}: {e}", path.display()))?;
    let mut decoder = Decoder::new(BufReader::new(file));
    let mut templates = HashMap::new();
    while let Some(template) = decoder
        .decode::<Template>()
        .map_err(|e| format!("decoding {}: {e}", path.display()))?
    {
        templates.insert(template.id, template);
    }
    Ok(templates)
}

/// Runs on a blocking-pool thread: decodes records one at a time, checking
/// `cancel` between records so a long work file doesn't outlive a cancelled job.
fn stream_work(
    path: &Path,
    cancel: CancellationToken,
    work_tx: mpsc::Sender<Work>,
    err_tx: mpsc::Sender<String>,
) {
    let file = match std::fs::File::open(path) {
        Ok(file) => file,
        Err(e) => {
            let _ = err_tx.blocking_send(format!("opening {}: {e}", path.display()));
            return;
        }
    };
    let mut decoder = Decoder::new(BufReader::new(file));

    loop {
        if cancel.is_cancelled() {
            return;
        }
        match decoder.decode::<Work>() {
            Ok(Some(work)) => {
                if work_tx.blocking_send(work).is_err() {
                    return;
                }
            }
            Ok(None) => return,
            Err(e) => {
                let _ = err_tx.blocking_send(format!("decoding {}: {e}", path.display()));
                return;
            }
        }
    }
}
