mod format;
mod story_session;
mod tui;


use std::io::{self, BufRead, Write};

use anyhow::{Context, Result, anyhow, bail};
use rand::SeedableRng;
use rand::rngs::StdRng;
use tracing::{info, warn};

use crate::cli::{Cli, Command};
use crate::config::AppConfig;
use crate::db::Database;
use crate::paths::{config_file_path, database_file_path};
use crate::remote::{ApiClient, Credentials, IdentityProvider, RemoteError};
use crate::story::{
    Actor, Episode, EpisodeCatalog, EpisodeId, LedgerError, LineId, LocalLedger, Resolution,
    SelectionRequest, StationCatalog, StoryCatalog,
};

use self::format::{episode_text, format_timestamp_display, marker_label, truncate};
use self::story_session::{SaveError, StorySession};

pub(crate) type Session<'c, 's> = StorySession<'c, 's, ApiClient>;

pub fn run(cli: Cli) -> Result<()> {
    let config = AppConfig::load(&config_file_path()?)?;
    let line = LineId::new(cli.line.clone().unwrap_or_else(|| config.line.clone()));
    let catalog = load_catalog(&config)?;
    if catalog.line(&line).is_none() {
        let known: Vec<&str> = catalog.lines().iter().map(|l| l.line.as_str()).collect();
        bail!("unknown line `{line}` (available: {})", known.join(", "));
    }

    let db = open_db();
    let local = match &db {
        Ok(db) => LocalLedger::new(db),
        Err(err) => {
            warn!("database unavailable, visits will not be kept: {err:#}");
            LocalLedger::in_memory(format!("database unavailable: {err:#}"))
        }
    };
    let mut session: Session<'_, '_> =
        StorySession::new(&catalog, local, StdRng::from_entropy());
    let client = ApiClient::new(&config.api_base_url, config.http);
    restore_member(&mut session, db.as_ref().ok(), &client);
    if let Some(warning) = session.storage_warning() {
        eprintln!("warning: {warning}");
    }

    match cli.command {
        Some(Command::Map) => run_map(&session, &line)?,
        Some(Command::Station { name }) => run_station(&mut session, &line, &name)?,
        Some(Command::Episode { id }) => {
            let request = SelectionRequest::ByEpisode(EpisodeId::new(id.trim()));
            open_and_print(&mut session, &request, "No episode with that id.");
        }
        Some(Command::Random) => {
            let request = SelectionRequest::Random(line.clone());
            open_and_print(&mut session, &request, "This line has no stories yet.");
        }
        Some(Command::Save { episode_id }) => run_save(&mut session, &episode_id)?,
        Some(Command::History) => run_history(&session, db.as_ref().ok()),
        Some(Command::Login { username, password }) => {
            let db = require_db(&db)?;
            run_login(&mut session, db, &client, &username, password)?;
        }
        Some(Command::Logout) => run_logout(&mut session, require_db(&db)?)?,
        Some(Command::Tui) | None => tui::run_tui(&mut session, &line)?,
    }

    Ok(())
}

fn open_db() -> Result<Database> {
    let db_path = database_file_path()?;
    let db = Database::open(&db_path)?;
    db.migrate()?;
    Ok(db)
}

fn require_db(db: &Result<Database>) -> Result<&Database> {
    db.as_ref()
        .map_err(|err| anyhow!("local database unavailable: {err:#}"))
}

fn load_catalog(config: &AppConfig) -> Result<StoryCatalog> {
    match &config.catalog_path {
        Some(path) => StoryCatalog::load(path)
            .with_context(|| format!("failed to load story catalog {}", path.display())),
        None => StoryCatalog::bundled().context("bundled story catalog is invalid"),
    }
}

/// Resume a stored login. Any failure leaves the session as a guest.
fn restore_member(session: &mut Session<'_, '_>, db: Option<&Database>, client: &ApiClient) {
    let Some(db) = db else {
        return;
    };
    let stored = match db.credentials() {
        Ok(Some(stored)) => stored,
        Ok(None) => return,
        Err(err) => {
            warn!("could not read stored session: {err:#}");
            return;
        }
    };
    let client = client.clone().with_credentials(Credentials {
        session_id: stored.session_id,
        csrf_token: stored.csrf_token,
    });
    match client.current_actor() {
        Actor::Account(account) => {
            let outcome = session.authenticate(account, client);
            report_notice(outcome.notice.as_ref());
        }
        Actor::Anonymous => info!(username = %stored.username, "stored session not accepted"),
    }
}

fn report_notice(notice: Option<&LedgerError>) {
    if let Some(notice) = notice
        && notice.user_visible()
    {
        eprintln!("warning: {notice}");
    }
}

fn line_catalog<'c>(session: &Session<'c, '_>, line: &LineId) -> Result<&'c StationCatalog> {
    session
        .catalog()
        .line(line)
        .with_context(|| format!("unknown line `{line}`"))
}

pub(crate) fn station_name(catalog: &StoryCatalog, episode: &Episode) -> String {
    catalog
        .station(&episode.station_id)
        .map(|station| station.display_name.clone())
        .unwrap_or_else(|| episode.station_id.to_string())
}

fn run_map(session: &Session<'_, '_>, line: &LineId) -> Result<()> {
    let stations = line_catalog(session, line)?;
    let markers = session.markers(line).unwrap_or_default();
    println!(
        "{}: {} stories, reading as {}",
        stations.name,
        session.catalog().index().len(),
        session.actor().label()
    );
    println!("{:<4} {:<20} {:<9} {:<8}", "#", "STATION", "STORIES", "STATUS");
    for station in stations.stations() {
        let stories = session.catalog().episodes_for_station(&station.id).len();
        println!(
            "{:<4} {:<20} {:<9} {:<8}",
            station.ordinal + 1,
            truncate(&station.display_name, 20),
            stories,
            marker_label(markers.get(&station.id))
        );
    }
    Ok(())
}

fn run_station(session: &mut Session<'_, '_>, line: &LineId, name: &str) -> Result<()> {
    let stations = line_catalog(session, line)?;
    let Some(station) = stations.find(name) else {
        println!("No station named `{name}` on {}.", stations.name);
        return Ok(());
    };
    let clickable = session
        .markers(line)
        .and_then(|markers| markers.get(&station.id).copied())
        .is_some_and(|state| state.clickable);
    if !clickable {
        if session.actor().is_authenticated() {
            println!("{} has no stories yet.", station.display_name);
        } else {
            println!(
                "{} is still locked. Use `hisubtory random` to discover new stations, or log in.",
                station.display_name
            );
        }
        return Ok(());
    }
    let request = SelectionRequest::ByStation(station.id.clone());
    open_and_print(session, &request, "This station has no stories yet.");
    Ok(())
}

fn open_and_print(session: &mut Session<'_, '_>, request: &SelectionRequest, empty: &str) {
    let outcome = session.resolve(request);
    report_notice(outcome.notice.as_ref());
    match outcome.value {
        Resolution::Found(episode) => {
            let station = station_name(session.catalog(), episode);
            let saved = session.ledger().is_saved(&episode.id);
            print!("{}", episode_text(episode, &station, saved));
        }
        Resolution::NotFound => println!("{empty}"),
    }
}

fn run_save(session: &mut Session<'_, '_>, episode_id: &str) -> Result<()> {
    let id = EpisodeId::new(episode_id.trim());
    match session.toggle_saved(&id) {
        Ok(true) => println!("Saved {id}."),
        Ok(false) => println!("Removed {id} from saved episodes."),
        Err(SaveError::RequiresLogin) => {
            println!("Saving episodes needs an account. Run `hisubtory login` first.")
        }
        Err(err @ SaveError::UnknownEpisode(_)) => println!("{err}"),
        Err(SaveError::Ledger(err)) => println!("Bookmark unchanged: {err}"),
    }
    Ok(())
}

fn run_history(session: &Session<'_, '_>, db: Option<&Database>) {
    match session.actor() {
        Actor::Account(account) => {
            let since = db
                .and_then(|db| db.credentials().ok().flatten())
                .map(|stored| format!(" since {}", format_timestamp_display(&stored.saved_at)))
                .unwrap_or_default();
            println!("Signed in as {}{since}", account.username);
        }
        Actor::Anonymous => println!("Reading as guest on this device"),
    }

    let catalog = session.catalog();
    println!("\nRecently read:");
    let recent = session.recent();
    if recent.is_empty() {
        println!("  nothing yet");
    }
    for episode in recent {
        println!(
            "  {:<12} {:<16} {}",
            truncate(episode.id.as_str(), 12),
            truncate(&station_name(catalog, episode), 16),
            episode.title
        );
    }

    println!("\nSaved:");
    let saved = session.saved();
    if saved.is_empty() {
        println!("  nothing yet");
    }
    for episode in saved {
        println!(
            "  {:<12} {:<16} {}",
            truncate(episode.id.as_str(), 12),
            truncate(&station_name(catalog, episode), 16),
            episode.title
        );
    }
}

fn read_password() -> Result<String> {
    print!("Password: ");
    io::stdout().flush().context("failed to flush stdout")?;
    let mut line = String::new();
    io::stdin()
        .lock()
        .read_line(&mut line)
        .context("failed to read password")?;
    Ok(line.trim_end_matches(['\r', '\n']).to_string())
}

fn run_login(
    session: &mut Session<'_, '_>,
    db: &Database,
    client: &ApiClient,
    username: &str,
    password: Option<String>,
) -> Result<()> {
    let password = match password {
        Some(password) => password,
        None => read_password()?,
    };
    let (credentials, account) = match client.login(username, &password) {
        Ok(login) => login,
        Err(RemoteError::Rejected(reason)) => {
            println!("Login failed: {reason}");
            return Ok(());
        }
        Err(err) => return Err(err).context("login request failed"),
    };
    db.save_credentials(
        &credentials.session_id,
        &credentials.csrf_token,
        &account.username,
    )?;

    if let Some(previous) = session.sign_out()
        && let Err(err) = previous.logout()
    {
        warn!("server logout of the previous account failed: {err}");
    }
    let username = account.username.clone();
    let outcome = session.authenticate(account, client.clone().with_credentials(credentials));
    report_notice(outcome.notice.as_ref());
    println!(
        "Signed in as {username}. {} episode(s) read so far.",
        session.ledger().viewed().len()
    );
    Ok(())
}

fn run_logout(session: &mut Session<'_, '_>, db: &Database) -> Result<()> {
    if let Some(remote) = session.sign_out()
        && let Err(err) = remote.logout()
    {
        warn!("server logout failed: {err}");
    }
    if db.clear_credentials()? {
        println!("Signed out.");
    } else {
        println!("Not signed in.");
    }
    Ok(())
}
