use std::collections::BTreeMap;
use std::fs;
use std::path::PathBuf;
use std::process::ExitCode;

use streaming::{
    ChunkManager, FileStore, MemoryStore, PersistentStore, RecordingEngine, TileState,
};
use tracing::{error, info, warn};

use super::bootstrap::AppWiring;

const SESSION_SAVE_FILE: &str = "session.json";

pub(crate) fn run(app: AppWiring) -> ExitCode {
    match run_session(app) {
        Ok(save_path) => {
            info!(path = %save_path.display(), "session_saved");
            ExitCode::SUCCESS
        }
        Err(err) => {
            error!(error = %err, "session_failed");
            ExitCode::FAILURE
        }
    }
}

/// Walks the configured route, printing the grid after every move, then
/// saves the session next to the tile blobs and checks that it restores.
fn run_session(app: AppWiring) -> Result<PathBuf, String> {
    let levels = app
        .world
        .build_area(&app.config)
        .map_err(|err| format!("build area: {err}"))?;
    let mut store = FileStore::open(&app.store_dir)
        .map_err(|err| format!("open store '{}': {err}", app.store_dir.display()))?;
    // Start empty; earlier runs may have left blobs in this directory.
    store
        .restore_dump(BTreeMap::new())
        .map_err(|err| format!("clear store '{}': {err}", app.store_dir.display()))?;
    let mut manager = ChunkManager::new(app.config.clone(), levels, store, RecordingEngine::new())
        .map_err(|err| format!("create chunk manager: {err}"))?;

    let mut at = app.start;
    manager
        .on_player_tile_changed(at, None)
        .map_err(|err| format!("place player at {at}: {err}"))?;
    println!("{}", manager.grid_dump());

    for (index, dir) in app.route.iter().copied().enumerate() {
        let Some(next) = manager.grid().neighbor(at, dir) else {
            warn!(step = index, tile = %at, direction = %dir, "route_step_leaves_grid");
            continue;
        };
        let report = manager
            .on_player_tile_changed(next, Some(at))
            .map_err(|err| format!("route step {index} ({dir}) from {at}: {err}"))?;
        info!(
            step = index,
            tile = %next,
            promoted = report.count(TileState::Json, TileState::Loaded),
            demoted = report.count(TileState::Loaded, TileState::Json)
                + report.count(TileState::Loaded, TileState::OnDisk),
            scheduled_actors = manager.engine().scheduled.len(),
            "route_step"
        );
        at = next;
        println!("{}", manager.grid_dump());
    }

    let raw = manager
        .save_json()
        .map_err(|err| format!("encode session: {err}"))?;
    let save_path = app.store_dir.join(SESSION_SAVE_FILE);
    fs::write(&save_path, &raw)
        .map_err(|err| format!("write session '{}': {err}", save_path.display()))?;

    let restored = ChunkManager::restore_json(&raw, MemoryStore::new(), RecordingEngine::new())
        .map_err(|err| format!("restore session: {err}"))?;
    if restored.grid_dump() != manager.grid_dump() {
        return Err("restored session does not match the saved grid".to_string());
    }
    info!(
        moves = restored.recorded_tile_moves().len(),
        stored_tiles = restored.store().len(),
        "session_restore_verified"
    );
    Ok(save_path)
}
