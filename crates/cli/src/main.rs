use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::{Parser, Subcommand};
use fanarchive_core::{
    Chapter, Comment, CommentThread, CountBound, FetchMode, GateConfig, RateGate, SearchQuery,
    Series, SortColumn, SortDirection, Transport, TransportConfig, User, Work, search_works,
};
use owo_colors::OwoColorize;

const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Browse works, users, and series on the archive
#[derive(Parser, Debug)]
#[command(name = "fanarchive")]
#[command(version = VERSION)]
#[command(about = "Browse works, users, and series on the archive", long_about = None)]
struct Args {
    /// Requests admitted per window (default: unlimited)
    #[arg(long, global = true, value_name = "NUM")]
    max_requests: Option<u32>,

    /// Rate window in seconds
    #[arg(long, global = true, default_value = "400", value_name = "SECS")]
    window: u64,

    /// HTTP timeout in seconds
    #[arg(long, global = true, default_value = "30", value_name = "SECS")]
    timeout: u64,

    /// Custom User-Agent for HTTP requests
    #[arg(long, global = true, value_name = "UA")]
    user_agent: Option<String>,

    /// Fetch listing pages concurrently
    #[arg(long, global = true)]
    fan_out: bool,

    /// Enable debug logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Print a work's metadata as JSON
    Work {
        /// Numeric work id
        id: u64,

        /// Fetch the full work instead of the first-chapter view
        #[arg(long)]
        full: bool,

        /// Print the work's text instead of its metadata
        #[arg(long)]
        text: bool,
    },

    /// Print a chapter's title and text
    Chapter {
        /// Numeric chapter id
        id: u64,
    },

    /// Print a user's profile
    User {
        /// Username
        name: String,

        /// List the user's works
        #[arg(long)]
        works: bool,
    },

    /// Print a series
    Series {
        /// Numeric series id
        id: u64,

        /// List the works in the series
        #[arg(long)]
        works: bool,
    },

    /// Search works
    Search {
        /// Free-text query matched against any field
        query: String,

        /// Result page to print
        #[arg(long, default_value = "1", value_name = "NUM")]
        page: u32,

        /// Restrict to works in this fandom
        #[arg(long, value_name = "NAME")]
        fandom: Option<String>,

        /// Only list completed works
        #[arg(long)]
        complete: bool,

        /// Only works with at least this many kudos
        #[arg(long, value_name = "NUM")]
        min_kudos: Option<u64>,

        /// Order results by kudos instead of relevance
        #[arg(long)]
        top: bool,
    },

    /// Print the reply thread around a comment
    Comment {
        /// Numeric comment id
        id: u64,

        /// Maximum comments to attach
        #[arg(long, value_name = "NUM")]
        maximum: Option<usize>,
    },
}

/// Print a styled banner for verbose mode
fn print_banner() {
    eprintln!("\n{} {} {}", "Fanarchive".bold().bright_blue(), "v".dimmed(), VERSION.dimmed());
    eprintln!("{}", "Browse works, users, and series on the archive".dimmed());
    eprintln!();
}

/// Print a labeled value line
fn print_field(label: &str, value: &str) {
    println!("{} {}", format!("{label}:").dimmed(), value.bright_white());
}

fn print_work_line(work: &Work) -> anyhow::Result<()> {
    let title = work.title().context("listing entry has no title")?;
    println!("  {} {}", work.id().to_string().dimmed(), title.bright_white());
    Ok(())
}

fn print_thread(node: &CommentThread, depth: usize) {
    let indent = "  ".repeat(depth);
    let author = node.author.as_deref().unwrap_or("(unknown)");
    println!("{indent}{} {}", author.bright_cyan(), format!("#{}", node.id).dimmed());
    for line in node.text.lines() {
        println!("{indent}  {line}");
    }
    for reply in &node.replies {
        print_thread(reply, depth + 1);
    }
}

fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    if args.verbose {
        print_banner();
        tracing_subscriber::fmt()
            .with_max_level(tracing::Level::DEBUG)
            .with_writer(std::io::stderr)
            .init();
    }

    let gate = RateGate::new(GateConfig {
        max_requests: args.max_requests,
        window: Duration::from_secs(args.window),
    });
    let config = TransportConfig {
        timeout: args.timeout,
        user_agent: args.user_agent.unwrap_or_else(|| TransportConfig::default().user_agent),
    };
    let transport =
        Transport::with_config(Arc::new(gate), config).context("Failed to build HTTP client")?;
    let mode = if args.fan_out { FetchMode::FanOut } else { FetchMode::Sequential };

    match args.command {
        Command::Work { id, full, text } => {
            let mut work = Work::new(id);
            // The text lives in the chapters, so --text implies a full fetch.
            let metadata_only = !(full || text);
            work.reload(&transport, None, metadata_only)
                .with_context(|| format!("Failed to load work {id}"))?;
            if text {
                println!("{}", work.text()?);
            } else {
                let metadata = work.metadata()?;
                println!("{}", serde_json::to_string_pretty(&metadata)?);
            }
        }
        Command::Chapter { id } => {
            let mut chapter = Chapter::new(id);
            chapter
                .reload(&transport, None)
                .with_context(|| format!("Failed to load chapter {id}"))?;
            println!("{}", chapter.title()?.bold());
            println!();
            println!("{}", chapter.text()?);
        }
        Command::User { name, works } => {
            let mut user = User::new(name);
            user.reload(&transport, None)
                .with_context(|| format!("Failed to load user {}", user.username()))?;
            println!("{}", user.username().bold());
            print_field("Works", &user.n_works()?.to_string());
            print_field("Bookmarks", &user.n_bookmarks()?.to_string());
            let bio = user.bio()?;
            if !bio.is_empty() {
                println!();
                println!("{bio}");
            }
            if works {
                println!();
                for work in user.get_works(&transport, None, false, mode)? {
                    print_work_line(&work)?;
                }
            }
        }
        Command::Series { id, works } => {
            let mut series = Series::new(id);
            series
                .reload(&transport, None)
                .with_context(|| format!("Failed to load series {id}"))?;
            println!("{}", series.name()?.bold());
            print_field("Creators", &series.creators()?.join(", "));
            print_field("Works", &series.nworks()?.to_string());
            print_field("Words", &series.words()?.to_string());
            print_field("Complete", if series.complete()? { "Yes" } else { "No" });
            if let Some(begun) = series.series_begun()? {
                print_field("Begun", &begun);
            }
            if let Some(updated) = series.series_updated()? {
                print_field("Updated", &updated);
            }
            let description = series.description()?;
            if !description.is_empty() {
                println!();
                println!("{description}");
            }
            if works {
                println!();
                for work in series.work_list(&transport, None, false, mode)? {
                    print_work_line(&work)?;
                }
            }
        }
        Command::Search { query, page, fandom, complete, min_kudos, top } => {
            let query = SearchQuery {
                any_field: query,
                fandoms: fandom.unwrap_or_default(),
                completion_status: complete.then_some(true),
                kudos: min_kudos.map(CountBound::AtLeast),
                sort_column: top.then_some(SortColumn::Kudos),
                sort_direction: top.then_some(SortDirection::Descending),
                ..Default::default()
            };
            let results =
                search_works(&transport, None, &query, page).context("Search request failed")?;
            print_field("Found", &results.total.to_string());
            if results.pages > 1 {
                print_field("Page", &format!("{} of {}", results.page, results.pages));
            }
            if !results.works.is_empty() {
                println!();
            }
            for work in &results.works {
                print_work_line(work)?;
            }
        }
        Command::Comment { id, maximum } => {
            let mut comment = Comment::new(id);
            let thread = comment
                .get_thread(&transport, None, maximum)
                .with_context(|| format!("Failed to load comment {id}"))?;
            print_thread(&thread, 0);
        }
    }

    Ok(())
}
