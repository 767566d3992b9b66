//! CLI definitions using clap.

use clap::{Args, Parser, Subcommand};
use vagabond::util::shell::ColorChoice;

/// Vagabond - plugin-driven lifecycle orchestration for development machines
#[derive(Parser)]
#[command(name = "vagabond")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Only print warnings and errors
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// Coloring: auto, always, never
    #[arg(long, global = true, value_name = "WHEN", default_value = "auto")]
    pub color: ColorChoice,

    /// Disable colored output
    #[arg(long, global = true)]
    pub no_color: bool,

    #[command(subcommand)]
    pub command: Commands,
}

impl Cli {
    /// Effective color choice; `--no-color` wins.
    pub fn color_choice(&self) -> ColorChoice {
        if self.no_color {
            ColorChoice::Never
        } else {
            self.color
        }
    }
}

#[derive(Subcommand)]
pub enum Commands {
    /// Manage installed boxes
    Box(BoxArgs),

    /// List every machine recorded on this host
    GlobalStatus(GlobalStatusArgs),

    /// Detect the host platform and show its capability chain
    Host(HostArgs),
}

#[derive(Args)]
pub struct BoxArgs {
    #[command(subcommand)]
    pub command: BoxCommands,
}

#[derive(Subcommand)]
pub enum BoxCommands {
    /// Install a box from a file, directory, URL or catalog
    Add(BoxAddArgs),

    /// List installed boxes
    List(BoxListArgs),

    /// Remove installed boxes
    Remove(BoxRemoveArgs),

    /// Resolve a box constraint to an installed box
    Find(BoxFindArgs),
}

#[derive(Args)]
pub struct BoxAddArgs {
    /// Box archive, directory, http(s) URL, or `.json` catalog
    pub location: String,

    /// Name to install under (required unless adding from a catalog)
    #[arg(long)]
    pub name: Option<String>,

    /// Exact version for direct adds, version constraint for catalogs
    #[arg(long = "box-version", value_name = "VERSION")]
    pub box_version: Option<String>,

    /// Acceptable provider (repeatable, in order of preference)
    #[arg(long)]
    pub provider: Vec<String>,

    /// Expected checksum of the box file
    #[arg(long)]
    pub checksum: Option<String>,

    /// Checksum algorithm: sha256, sha384 or sha512
    #[arg(long, default_value = "sha256")]
    pub checksum_type: String,

    /// Replace an installed box with the same name, version and provider
    #[arg(short, long)]
    pub force: bool,
}

#[derive(Args)]
pub struct BoxListArgs {
    /// Show each box's directory and catalog URL
    #[arg(short, long)]
    pub info: bool,
}

#[derive(Args)]
pub struct BoxRemoveArgs {
    /// Box name
    pub name: String,

    /// Only remove versions matching this constraint
    #[arg(long = "box-version", value_name = "CONSTRAINT")]
    pub box_version: Option<String>,

    /// Only remove boxes for this provider (repeatable)
    #[arg(long)]
    pub provider: Vec<String>,

    /// Remove even if machines still use the box
    #[arg(short, long)]
    pub force: bool,
}

#[derive(Args)]
pub struct BoxFindArgs {
    /// Box name
    pub name: String,

    /// Version constraint, e.g. "~> 1.2" or ">= 1.0, < 2.0"
    #[arg(long = "box-version", value_name = "CONSTRAINT")]
    pub box_version: Option<String>,

    /// Acceptable provider (repeatable, in order of preference)
    #[arg(long)]
    pub provider: Vec<String>,
}

#[derive(Args)]
pub struct GlobalStatusArgs {
    /// Remove entries whose machine directory no longer exists
    #[arg(long)]
    pub prune: bool,
}

#[derive(Args)]
pub struct HostArgs {
    /// Use this host platform instead of detecting it
    #[arg(long)]
    pub platform: Option<String>,
}
