//! Tokens command implementation.

use crate::cli::args::TokensArgs;
use crate::cli::output::Output;
use crate::config::Config;
use crate::error::Result;
use crate::search::{Analyzer, Token};
use serde::Serialize;

#[derive(Debug, Serialize)]
pub struct TokensResponse {
    pub language: String,
    pub stemming: bool,
    pub tokens: Vec<Token>,
}

pub fn analyze(config: &Config, args: &TokensArgs) -> TokensResponse {
    let language = args
        .language
        .clone()
        .unwrap_or_else(|| config.wiki.language_default.clone());
    let analyzer = Analyzer::new(&language, args.stem || config.search.stemming);

    TokensResponse {
        stemming: analyzer.stemming(),
        tokens: analyzer.tokenize(&args.text).collect(),
        language,
    }
}

pub fn run(config: &Config, args: &TokensArgs, output: &Output) -> Result<()> {
    output.print(&analyze(config, args))
}
