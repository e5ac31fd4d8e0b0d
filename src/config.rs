use anyhow::{Context, Result};
use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};

/// Top-level configuration, loaded from `config.toml` under the memory root.
/// Constructed once and passed explicitly into each component; there is no
/// process-wide singleton.
#[derive(Debug, Clone, Deserialize)]
pub struct AssistantConfig {
    #[serde(default)]
    pub memory: MemoryConfig,
    #[serde(default)]
    pub context: ContextConfig,
    #[serde(default)]
    pub proposals: ProposalPolicy,
    #[serde(default)]
    pub generator: GeneratorConfig,
    #[serde(default)]
    pub mail: MailPolicy,
}

impl AssistantConfig {
    pub fn load(root: &Path) -> Result<Self> {
        let path = root.join("config.toml");
        let mut cfg = if path.exists() {
            let text = fs::read_to_string(&path)
                .with_context(|| format!("reading config file {}", path.display()))?;
            toml::from_str::<AssistantConfig>(&text)
                .with_context(|| format!("parsing config file {}", path.display()))?
        } else {
            tracing::info!(
                "No config file found at {}. Using AssistantConfig::default().",
                path.display()
            );
            AssistantConfig::default()
        };
        cfg.resolve_paths(root);
        Ok(cfg)
    }

    /// Defaults with every path anchored under `root`. Handy for tests and
    /// for embedding without a config file.
    pub fn for_root(root: &Path) -> Self {
        let mut cfg = AssistantConfig::default();
        cfg.resolve_paths(root);
        cfg
    }

    fn resolve_paths(&mut self, root: &Path) {
        self.memory.dir = absolutize(root, &self.memory.dir);
        self.memory.telos_file = absolutize(&self.memory.dir, &self.memory.telos_file);
        self.memory.journal_file = absolutize(&self.memory.dir, &self.memory.journal_file);
        self.memory.changes_file = absolutize(&self.memory.dir, &self.memory.changes_file);
        self.memory.processed_mail_file =
            absolutize(&self.memory.dir, &self.memory.processed_mail_file);
    }
}

impl Default for AssistantConfig {
    fn default() -> Self {
        Self {
            memory: MemoryConfig::default(),
            context: ContextConfig::default(),
            proposals: ProposalPolicy::default(),
            generator: GeneratorConfig::default(),
            mail: MailPolicy::default(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct MemoryConfig {
    #[serde(default = "MemoryConfig::default_dir")]
    pub dir: PathBuf,
    #[serde(default = "MemoryConfig::default_telos_file")]
    pub telos_file: PathBuf,
    #[serde(default = "MemoryConfig::default_journal_file")]
    pub journal_file: PathBuf,
    #[serde(default = "MemoryConfig::default_changes_file")]
    pub changes_file: PathBuf,
    #[serde(default = "MemoryConfig::default_processed_mail_file")]
    pub processed_mail_file: PathBuf,
}

impl MemoryConfig {
    fn default_dir() -> PathBuf {
        PathBuf::from("memory")
    }
    fn default_telos_file() -> PathBuf {
        PathBuf::from("telos.jsonl")
    }
    fn default_journal_file() -> PathBuf {
        PathBuf::from("journal.md")
    }
    fn default_changes_file() -> PathBuf {
        PathBuf::from("changes.jsonl")
    }
    fn default_processed_mail_file() -> PathBuf {
        PathBuf::from("processed_emails.jsonl")
    }
}

impl Default for MemoryConfig {
    fn default() -> Self {
        Self {
            dir: Self::default_dir(),
            telos_file: Self::default_telos_file(),
            journal_file: Self::default_journal_file(),
            changes_file: Self::default_changes_file(),
            processed_mail_file: Self::default_processed_mail_file(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ContextConfig {
    /// Token budget for the rendered context; the character budget is four
    /// times this figure.
    #[serde(default = "ContextConfig::default_max_context_tokens")]
    pub max_context_tokens: usize,
    #[serde(default = "ContextConfig::default_max_entries_per_store")]
    pub max_entries_per_store: usize,
    #[serde(default = "ContextConfig::default_date_range_days")]
    pub date_range_days: i64,
    /// Journal bodies longer than this are excerpted in rendered context.
    #[serde(default = "ContextConfig::default_excerpt_chars")]
    pub excerpt_chars: usize,
}

impl ContextConfig {
    fn default_max_context_tokens() -> usize {
        4000
    }
    fn default_max_entries_per_store() -> usize {
        10
    }
    fn default_date_range_days() -> i64 {
        30
    }
    fn default_excerpt_chars() -> usize {
        500
    }

    pub fn max_context_chars(&self) -> usize {
        self.max_context_tokens * 4
    }
}

impl Default for ContextConfig {
    fn default() -> Self {
        Self {
            max_context_tokens: Self::default_max_context_tokens(),
            max_entries_per_store: Self::default_max_entries_per_store(),
            date_range_days: Self::default_date_range_days(),
            excerpt_chars: Self::default_excerpt_chars(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ProposalPolicy {
    /// Hard ceiling on items per proposal, across both stores. Exceeding it
    /// fails validation outright rather than truncating.
    #[serde(default = "ProposalPolicy::default_max_items")]
    pub max_items: usize,
    /// Re-generate attempts when a model reply fails proposal validation.
    #[serde(default = "ProposalPolicy::default_max_validation_retries")]
    pub max_validation_retries: u32,
}

impl ProposalPolicy {
    fn default_max_items() -> usize {
        5
    }
    fn default_max_validation_retries() -> u32 {
        2
    }
}

impl Default for ProposalPolicy {
    fn default() -> Self {
        Self {
            max_items: Self::default_max_items(),
            max_validation_retries: Self::default_max_validation_retries(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct GeneratorConfig {
    #[serde(default = "GeneratorConfig::default_model")]
    pub model: String,
    #[serde(default = "GeneratorConfig::default_timeout_secs")]
    pub timeout_secs: u64,
}

impl GeneratorConfig {
    fn default_model() -> String {
        "llama2".to_string()
    }
    fn default_timeout_secs() -> u64 {
        120
    }
}

impl Default for GeneratorConfig {
    fn default() -> Self {
        Self {
            model: Self::default_model(),
            timeout_secs: Self::default_timeout_secs(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct MailPolicy {
    #[serde(default = "MailPolicy::default_days_back")]
    pub days_back: u32,
    #[serde(default = "MailPolicy::default_max_messages")]
    pub max_messages: usize,
    /// Word-overlap similarity above which a suggested todo is treated as a
    /// duplicate of an existing task.
    #[serde(default = "MailPolicy::default_duplicate_threshold")]
    pub duplicate_threshold: f64,
}

impl MailPolicy {
    fn default_days_back() -> u32 {
        7
    }
    fn default_max_messages() -> usize {
        50
    }
    fn default_duplicate_threshold() -> f64 {
        0.7
    }
}

impl Default for MailPolicy {
    fn default() -> Self {
        Self {
            days_back: Self::default_days_back(),
            max_messages: Self::default_max_messages(),
            duplicate_threshold: Self::default_duplicate_threshold(),
        }
    }
}

fn absolutize(root: &Path, value: &Path) -> PathBuf {
    if value.is_absolute() {
        value.to_path_buf()
    } else {
        root.join(value)
    }
}
