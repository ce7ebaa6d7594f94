//! CLI argument definitions using clap.

use crate::search::EngineChoice;
use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "wikisearch")]
#[command(author, version, about = "Structured full-text search for wikis", long_about = None)]
pub struct Cli {
    /// Path to the wiki (overrides config default)
    #[arg(long, global = true)]
    pub wiki: Option<PathBuf>,

    /// Output as JSON (default)
    #[arg(long, global = true, conflicts_with_all = ["yaml", "toml"])]
    pub json: bool,

    /// Output as YAML
    #[arg(long, global = true, conflicts_with_all = ["json", "toml"])]
    pub yaml: bool,

    /// Output as TOML
    #[arg(long, global = true, conflicts_with_all = ["json", "yaml"])]
    pub toml: bool,

    /// Suppress non-essential output
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// Increase log verbosity (can be repeated)
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    pub verbose: u8,

    #[command(subcommand)]
    pub command: Commands,
}

impl Cli {
    pub fn output_format(&self) -> OutputFormat {
        if self.yaml {
            OutputFormat::Yaml
        } else if self.toml {
            OutputFormat::Toml
        } else {
            OutputFormat::Json
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum)]
pub enum OutputFormat {
    #[default]
    Json,
    Yaml,
    Toml,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Search pages and attachments
    Search(SearchArgs),

    /// Parse a query and print its canonical form
    Parse(ParseArgs),

    /// Search index management commands
    Index(IndexArgs),

    /// Show how text is split into search tokens
    Tokens(TokensArgs),
}

#[derive(Parser, Debug)]
pub struct SearchArgs {
    /// Search query
    pub query: String,

    /// Treat unprefixed terms as title terms
    #[arg(long)]
    pub titles: bool,

    /// Search backend: auto, linear or index
    #[arg(long, default_value = "auto")]
    pub engine: EngineChoice,

    /// Maximum number of hits
    #[arg(long)]
    pub limit: Option<usize>,

    /// Number of hits to skip
    #[arg(long, default_value = "0")]
    pub offset: usize,

    /// Search as this user (anonymous if omitted)
    #[arg(long = "as", value_name = "IDENTITY")]
    pub identity: Option<String>,
}

#[derive(Parser, Debug)]
pub struct ParseArgs {
    /// Search query
    pub query: String,

    /// Treat unprefixed terms as title terms
    #[arg(long)]
    pub titles: bool,
}

// === Index Operations ===

#[derive(Parser, Debug)]
pub struct IndexArgs {
    #[command(subcommand)]
    pub command: IndexCommands,
}

#[derive(Subcommand, Debug)]
pub enum IndexCommands {
    /// Show index status and statistics
    Status,

    /// Build the index from scratch
    Rebuild,

    /// Remove the index entirely
    Clear,

    /// Re-index one page or attachment
    Update(IndexUpdateArgs),
}

#[derive(Parser, Debug)]
pub struct IndexUpdateArgs {
    /// Page name
    pub page: String,

    /// Attachment file name on the page
    #[arg(long)]
    pub attachment: Option<String>,

    /// Remove the document from the index instead
    #[arg(long)]
    pub delete: bool,
}

#[derive(Parser, Debug)]
pub struct TokensArgs {
    /// Text to analyze
    pub text: String,

    /// Stem tokens (defaults to the configured setting)
    #[arg(long)]
    pub stem: bool,

    /// Stemmer language (defaults to the wiki default language)
    #[arg(long)]
    pub language: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_search_args() {
        let cli = Cli::try_parse_from([
            "wikisearch",
            "--wiki",
            "/tmp/wiki",
            "search",
            "title:Help",
            "--engine",
            "linear",
            "--limit",
            "5",
            "--as",
            "alice",
        ])
        .unwrap();

        assert_eq!(cli.wiki, Some(PathBuf::from("/tmp/wiki")));
        match cli.command {
            Commands::Search(args) => {
                assert_eq!(args.query, "title:Help");
                assert_eq!(args.engine, EngineChoice::Linear);
                assert_eq!(args.limit, Some(5));
                assert_eq!(args.offset, 0);
                assert_eq!(args.identity.as_deref(), Some("alice"));
            }
            other => panic!("unexpected command {:?}", other),
        }
    }

    #[test]
    fn test_output_format_flags() {
        let cli = Cli::try_parse_from(["wikisearch", "--yaml", "parse", "a"]).unwrap();
        assert_eq!(cli.output_format(), OutputFormat::Yaml);
        assert!(Cli::try_parse_from(["wikisearch", "--yaml", "--toml", "parse", "a"]).is_err());
    }

    #[test]
    fn test_index_update_args() {
        let cli = Cli::try_parse_from([
            "wikisearch",
            "index",
            "update",
            "FrontPage",
            "--attachment",
            "notes.txt",
            "--delete",
        ])
        .unwrap();
        match cli.command {
            Commands::Index(IndexArgs {
                command: IndexCommands::Update(args),
            }) => {
                assert_eq!(args.page, "FrontPage");
                assert_eq!(args.attachment.as_deref(), Some("notes.txt"));
                assert!(args.delete);
            }
            other => panic!("unexpected command {:?}", other),
        }
    }

    #[test]
    fn test_unknown_engine_rejected() {
        assert!(Cli::try_parse_from(["wikisearch", "search", "a", "--engine", "fast"]).is_err());
    }
}
