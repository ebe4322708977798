// ════════════════════════════════════════════════════════════════
//  Configuration
// ════════════════════════════════════════════════════════════════

fn default_data_dir() -> String {
    "data".into()
}

#[derive(Debug, Clone, serde::Deserialize)]
pub struct FileStoreConfig {
    /// Директория журнала: `{data_dir}/state.jsonl`.
    #[serde(default = "default_data_dir")]
    pub data_dir: String,
    /// fsync после каждого upsert.
    #[serde(default)]
    pub sync_writes: bool,
}

impl Default for FileStoreConfig {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
            sync_writes: false,
        }
    }
}
