//! Parse command implementation.

use crate::cli::args::ParseArgs;
use crate::cli::output::Output;
use crate::error::Result;
use crate::search::{parse_query_with, ParseOptions, QueryNode};
use serde::Serialize;

#[derive(Debug, Serialize)]
pub struct ParseResponse {
    pub query: String,
    /// Canonical rendering, e.g. `["a" -title:"b"]`.
    pub canonical: String,
    pub tree: QueryNode,
}

pub fn run(args: &ParseArgs, output: &Output) -> Result<()> {
    let query = parse_query_with(
        &args.query,
        ParseOptions {
            title_search: args.titles,
        },
    )?;

    output.print(&ParseResponse {
        canonical: query.to_string(),
        query: query.text,
        tree: query.root,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cli::args::OutputFormat;
    use crate::error::{QueryError, SearchError};

    fn args(query: &str) -> ParseArgs {
        ParseArgs {
            query: query.to_string(),
            titles: false,
        }
    }

    #[test]
    fn test_parse_ok() {
        let output = Output::new(OutputFormat::Json, true);
        assert!(run(&args("a -title:b"), &output).is_ok());
    }

    #[test]
    fn test_parse_error() {
        let output = Output::new(OutputFormat::Json, true);
        let result = run(&args(")"), &output);
        assert!(matches!(
            result,
            Err(SearchError::Query(QueryError::UnmatchedClose { .. }))
        ));
    }
}
