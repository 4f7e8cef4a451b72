// Copyright (C) 2024 Ryan Daum <ryan.daum@gmail.com>
//
// This program is free software: you can redistribute it and/or modify it under
// the terms of the GNU General Public License as published by the Free Software
// Foundation, version 3.
//
// This program is distributed in the hope that it will be useful, but WITHOUT
// ANY WARRANTY; without even the implied warranty of MERCHANTABILITY or FITNESS
// FOR A PARTICULAR PURPOSE. See the GNU General Public License for more details.
//
// You should have received a copy of the GNU General Public License along with
// this program. If not, see <https://www.gnu.org/licenses/>.
//

mod connection;
mod connections;
mod listen;
mod telnet;

use clap::Parser;
use clap_derive::Parser;
use connection::ConnectionContext;
use connections::ConnectionRegistry;
use corral_db::read_snapshot;
use corral_kernel::bootstrap::minimal_core;
use corral_kernel::config::load_server_options;
use corral_kernel::{BuiltinRegistry, SavedTask, Scheduler};
use listen::listen_loop;
use std::net::{IpAddr, SocketAddr};
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::select;
use tokio::signal::unix::{SignalKind, signal};
use tracing::{info, warn};

#[derive(Parser, Debug)]
#[command(name = "corral-daemon", about = "A MOO server")]
struct Args {
    #[arg(
        short,
        long,
        value_name = "db",
        help = "Path to the database snapshot to load and checkpoint to; a missing file bootstraps a minimal core"
    )]
    db: PathBuf,

    #[arg(
        long,
        value_name = "listen-address",
        help = "Address to bind listeners on",
        default_value = "0.0.0.0"
    )]
    listen_address: String,

    #[arg(
        short,
        long,
        value_name = "port",
        help = "Listen port; may be given more than once",
        default_value = "7777"
    )]
    port: Vec<u16>,

    #[arg(
        long,
        value_name = "checkpoint-seconds",
        help = "Seconds between automatic checkpoints",
        default_value = "3600"
    )]
    checkpoint_seconds: u64,

    #[arg(long, value_name = "log", help = "Append log output to this file")]
    log: Option<PathBuf>,

    #[arg(long, help = "Enable debug logging", default_value = "false")]
    debug: bool,
}

fn init_tracing(args: &Args) -> eyre::Result<()> {
    let level = if args.debug {
        tracing::Level::DEBUG
    } else {
        tracing::Level::INFO
    };
    match &args.log {
        Some(path) => {
            let file = std::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)?;
            let subscriber = tracing_subscriber::fmt()
                .compact()
                .with_ansi(false)
                .with_writer(file)
                .with_max_level(level)
                .finish();
            tracing::subscriber::set_global_default(subscriber)?;
        }
        None => {
            let subscriber = tracing_subscriber::fmt()
                .compact()
                .with_ansi(true)
                .with_thread_names(true)
                .with_max_level(level)
                .finish();
            tracing::subscriber::set_global_default(subscriber)?;
        }
    }
    Ok(())
}

fn main() {
    color_eyre::install().ok();
    // Exit code 2 belongs to panics, per the server's contract with its
    // wrapper scripts.
    let default_hook = std::panic::take_hook();
    std::panic::set_hook(Box::new(move |panic_info| {
        default_hook(panic_info);
        std::process::exit(2);
    }));

    let args = Args::parse();
    if let Err(e) = init_tracing(&args) {
        eprintln!("cannot initialize logging: {e}");
        std::process::exit(1);
    }
    match run(args) {
        Ok(()) => std::process::exit(0),
        Err(e) => {
            eprintln!("startup failed: {e:?}");
            std::process::exit(1);
        }
    }
}

fn run(args: Args) -> eyre::Result<()> {
    // Load the world, or bootstrap one.
    let (world_state, saved_tasks) = if args.db.exists() {
        let snapshot = read_snapshot(&args.db)?;
        let tasks: Vec<SavedTask> =
            serde_json::from_value(snapshot.tasks).unwrap_or_default();
        info!("Loaded database from {:?}", args.db);
        (snapshot.world, tasks)
    } else {
        warn!("No database at {:?}; bootstrapping a minimal core", args.db);
        (minimal_core(), vec![])
    };
    load_server_options(&world_state).map_err(|e| eyre::eyre!("$server_options: {e}"))?;
    let world = Arc::new(Mutex::new(world_state));

    let registry = Arc::new(ConnectionRegistry::new());
    let builtins = BuiltinRegistry::new();
    let mut scheduler = Scheduler::new(
        world.clone(),
        registry.clone(),
        builtins,
        args.db.clone(),
    );
    scheduler.restore_tasks(saved_tasks);
    let client = scheduler.client();
    let scheduler_thread = std::thread::Builder::new()
        .name("scheduler".to_string())
        .spawn(move || scheduler.run())?;

    let ctx = Arc::new(ConnectionContext {
        registry,
        client: client.clone(),
        world,
    });

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?;
    runtime.block_on(async {
        let bind_ip: IpAddr = args.listen_address.parse()?;
        for port in &args.port {
            let ctx = ctx.clone();
            let addr = SocketAddr::new(bind_ip, *port);
            tokio::spawn(async move {
                if let Err(e) = listen_loop(ctx, addr).await {
                    tracing::error!("listener failed: {e:?}");
                }
            });
        }

        let mut interrupt = signal(SignalKind::interrupt())?;
        let mut hangup = signal(SignalKind::hangup())?;
        let mut checkpoint_timer =
            tokio::time::interval(Duration::from_secs(args.checkpoint_seconds.max(60)));
        checkpoint_timer.tick().await; // swallow the immediate first tick

        let shutdown_client = client.clone();
        let scheduler_done = tokio::task::spawn_blocking(move || {
            let _ = scheduler_thread.join();
        });
        tokio::pin!(scheduler_done);

        loop {
            select! {
                _ = &mut scheduler_done => {
                    info!("Scheduler exited; shutting down");
                    break;
                }
                _ = interrupt.recv() => {
                    info!("SIGINT; requesting shutdown");
                    shutdown_client.shutdown(Some("interrupt".to_string()));
                }
                _ = hangup.recv() => {
                    info!("SIGHUP; checkpointing");
                    shutdown_client.checkpoint();
                }
                _ = checkpoint_timer.tick() => {
                    shutdown_client.checkpoint();
                }
            }
        }
        Ok::<(), eyre::Report>(())
    })?;

    info!("Done.");
    Ok(())
}
