use clap::{Parser, Subcommand};

#[derive(Debug, Parser)]
#[command(
    name = "hisubtory",
    version,
    about = "Read the history stories hidden along a subway line"
)]
pub struct Cli {
    /// Subway line to use (defaults to the configured line)
    #[arg(long, global = true)]
    pub line: Option<String>,

    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Show the stations of the line and which ones you visited
    Map,
    /// Open the story of a station
    Station { name: String },
    /// Open one episode by id
    Episode { id: String },
    /// Open a random story on the line
    Random,
    /// Save or unsave an episode (members only)
    Save { episode_id: String },
    /// Recently read and saved episodes
    History,
    Login {
        #[arg(long)]
        username: String,
        /// Read from stdin when omitted
        #[arg(long)]
        password: Option<String>,
    },
    Logout,
    Tui,
}
