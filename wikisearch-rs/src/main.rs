//! wikisearch CLI entry point.

use clap::Parser;
use std::process::ExitCode;
use wikisearch::cli::args::{Cli, Commands, IndexCommands};
use wikisearch::cli::output::Output;
use wikisearch::cli::{index, parse, search, tokens};
use wikisearch::config::Config;
use wikisearch::error::SearchError;
use wikisearch::logging;
use wikisearch::store::WikiDir;

fn main() -> ExitCode {
    let cli = Cli::parse();
    logging::init(cli.verbose);

    match run(&cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            if !cli.quiet {
                eprintln!("Error: {}", e);
            }
            ExitCode::from(e.exit_code() as u8)
        }
    }
}

fn run(cli: &Cli) -> Result<(), SearchError> {
    let config = Config::load()?;
    let output = Output::new(cli.output_format(), cli.quiet);

    // commands that never touch the wiki
    match &cli.command {
        Commands::Parse(args) => return parse::run(args, &output),
        Commands::Tokens(args) => return tokens::run(&config, args, &output),
        Commands::Search(_) | Commands::Index(_) => {}
    }

    let wiki_root = config.resolve_wiki_root(cli.wiki.as_deref())?;
    let wiki = WikiDir::from_config(wiki_root, &config)?;

    match &cli.command {
        Commands::Search(args) => search::run(&config, &wiki, args, &output),
        Commands::Index(args) => match &args.command {
            IndexCommands::Status => index::status(&config, &wiki, &output),
            IndexCommands::Rebuild => index::rebuild(&config, &wiki, &output),
            IndexCommands::Clear => index::clear(&config, &wiki, &output),
            IndexCommands::Update(update_args) => index::update(&config, &wiki, update_args, &output),
        },
        Commands::Parse(_) | Commands::Tokens(_) => Ok(()),
    }
}
