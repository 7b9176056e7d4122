use std::path::PathBuf;

use streaming::{Direction, PlainWorld, StreamingConfig, TileXY};
use tracing::info;
use tracing_subscriber::EnvFilter;

const SIZE_ENV_VAR: &str = "OVERWORLD_SIZE";
const RADII_ENV_VAR: &str = "OVERWORLD_RADII";
const SESSION_ENV_VAR: &str = "OVERWORLD_SESSION";
const STORE_DIR_ENV_VAR: &str = "OVERWORLD_STORE_DIR";
const ROUTE_ENV_VAR: &str = "OVERWORLD_ROUTE";

const DEFAULT_ROUTE: &str = "E,E,S,S,W,W,W,W,N,N,N,N,E,E";

pub(crate) struct AppWiring {
    pub(crate) config: StreamingConfig,
    pub(crate) world: PlainWorld,
    pub(crate) store_dir: PathBuf,
    pub(crate) start: TileXY,
    pub(crate) route: Vec<Direction>,
}

pub(crate) fn build_app() -> Result<AppWiring, String> {
    init_tracing();
    info!("=== Overworld Startup ===");

    let wiring = wiring_from_lookup(|var| std::env::var(var).ok())?;
    info!(
        session = %wiring.config.session_id,
        size_x = wiring.config.size_x,
        size_y = wiring.config.size_y,
        load_radius = wiring.config.load_radius,
        json_radius = wiring.config.json_radius,
        store_dir = %wiring.store_dir.display(),
        route_len = wiring.route.len(),
        "startup_config"
    );
    Ok(wiring)
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_thread_names(true)
        .compact()
        .init();
}

fn wiring_from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<AppWiring, String> {
    let mut config = StreamingConfig::default();
    if let Some(raw) = lookup(SIZE_ENV_VAR) {
        let (size_x, size_y) = parse_size(&raw).map_err(|err| format!("{SIZE_ENV_VAR}: {err}"))?;
        config.size_x = size_x;
        config.size_y = size_y;
    }
    if let Some(raw) = lookup(RADII_ENV_VAR) {
        let (load_radius, json_radius) =
            parse_radii(&raw).map_err(|err| format!("{RADII_ENV_VAR}: {err}"))?;
        config.load_radius = load_radius;
        config.json_radius = json_radius;
    }
    if let Some(raw) = lookup(SESSION_ENV_VAR) {
        let session = raw.trim();
        if !session.is_empty() {
            config.session_id = session.to_string();
        }
    }
    config
        .validate()
        .map_err(|err| format!("invalid streaming config: {err}"))?;

    let store_dir = lookup(STORE_DIR_ENV_VAR)
        .map(|raw| raw.trim().to_string())
        .filter(|raw| !raw.is_empty())
        .map(PathBuf::from)
        .unwrap_or_else(|| default_store_dir(&config.session_id));
    let route = parse_route(
        lookup(ROUTE_ENV_VAR)
            .as_deref()
            .unwrap_or(DEFAULT_ROUTE),
    )
    .map_err(|err| format!("{ROUTE_ENV_VAR}: {err}"))?;
    let start = TileXY::new(config.size_x / 2, config.size_y / 2);

    Ok(AppWiring {
        config,
        world: PlainWorld::default(),
        store_dir,
        start,
        route,
    })
}

fn default_store_dir(session_id: &str) -> PathBuf {
    std::env::temp_dir().join("overworld").join(session_id)
}

/// `"<x>x<y>"`, e.g. `9x5`.
fn parse_size(raw: &str) -> Result<(u32, u32), String> {
    let (x, y) = raw
        .trim()
        .split_once(['x', 'X'])
        .ok_or_else(|| format!("expected '<x>x<y>', got '{raw}'"))?;
    let size_x = parse_count(x)?;
    let size_y = parse_count(y)?;
    Ok((size_x, size_y))
}

/// `"<load>,<json>"`, e.g. `1,2`.
fn parse_radii(raw: &str) -> Result<(u32, u32), String> {
    let (load, json) = raw
        .trim()
        .split_once(',')
        .ok_or_else(|| format!("expected '<load>,<json>', got '{raw}'"))?;
    Ok((parse_count(load)?, parse_count(json)?))
}

fn parse_count(raw: &str) -> Result<u32, String> {
    let raw = raw.trim();
    raw.parse::<u32>()
        .map_err(|err| format!("'{raw}' is not a non-negative integer: {err}"))
}

/// Comma separated steps: `N`, `S`, `E`, `W` or the full direction names.
fn parse_route(raw: &str) -> Result<Vec<Direction>, String> {
    raw.split(',')
        .map(str::trim)
        .filter(|entry| !entry.is_empty())
        .map(|entry| match entry.to_ascii_lowercase().as_str() {
            "n" | "north" => Ok(Direction::North),
            "s" | "south" => Ok(Direction::South),
            "e" | "east" => Ok(Direction::East),
            "w" | "west" => Ok(Direction::West),
            _ => Err(format!("unknown step '{entry}'")),
        })
        .collect()
}
