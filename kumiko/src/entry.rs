//! The application entry point.
//!
//! An [`App`] collects setup closures that install components and mount
//! runners. [`main`] parses the command line, loads the configuration,
//! binds it on the carrier, runs the setup, serves the admin surface,
//! and hands the process to the shutdown supervisor.

use std::{future::Future, net::SocketAddr, sync::Arc};

use futures::future::BoxFuture;

use crate::{
    admin::{self, AdminState},
    cache::MemoryCache,
    configs::Configs,
    error::Result,
    lock::MemoryLock,
    registry::{Registry, global},
    scheduler::{ConfigCronStore, Scheduler},
    shutdown::{self, Workload, workload},
};

/// The default admin port.
pub const PORT: u16 = 9090;

/// What a setup closure gets to work with.
#[derive(Clone)]
pub struct Boot {
    pub registry: Registry,
    pub scheduler: Scheduler,
    pub work: Workload,
}

type SetupFn = Arc<dyn Fn(Boot) -> BoxFuture<'static, Result<()>> + Send + Sync>;

pub struct App {
    label: &'static str,
    port: u16,
    setup: Vec<SetupFn>,
}

impl App {
    pub fn new(label: &'static str) -> App {
        App {
            label,
            port: PORT,
            setup: Vec::new(),
        }
    }

    pub fn admin_port(mut self, port: u16) -> App {
        self.port = port;
        self
    }

    /// Add a setup stage. Stages run in order, after the built-in
    /// components are installed and with the configuration already bound
    /// on the carrier.
    pub fn setup<F, Fut>(mut self, f: F) -> App
    where
        F: Fn(Boot) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<()>> + Send + 'static,
    {
        self.setup.push(Arc::new(move |boot| Box::pin(f(boot))));
        self
    }
}

struct Args {
    config: Option<String>,
    bind: Option<String>,
    dump_config: bool,
}

fn parse_args(label: &'static str) -> Args {
    use clap::{Arg, ArgAction, Command};

    let m = Command::new(label)
        .arg(
            Arg::new("config")
                .long("config")
                .action(ArgAction::Set)
                .help("Path to the TOML configuration file"),
        )
        .arg(
            Arg::new("bind")
                .long("bind")
                .action(ArgAction::Set)
                .help("The IP address to bind the admin surface to"),
        )
        .arg(
            Arg::new("dump-config")
                .long("dump-config")
                .action(ArgAction::SetTrue)
                .help("Print the merged configuration and exit"),
        )
        .get_matches();

    Args {
        config: m.get_one::<String>("config").cloned(),
        bind: m.get_one::<String>("bind").cloned(),
        dump_config: m.get_flag("dump-config"),
    }
}

/// Run the application to completion. Exits the process.
pub fn main(app: App) {
    let args = parse_args(app.label);
    let configs = match &args.config {
        Some(path) => {
            let text = std::fs::read_to_string(path)
                .unwrap_or_else(|e| panic!("could not read config {path}: {e}"));
            Configs::from_toml_str(&text)
                .unwrap_or_else(|e| panic!("could not parse config {path}: {e}"))
        }
        None => Configs::new(),
    };

    if args.dump_config {
        let pretty = serde_json::to_string_pretty(configs.value())
            .expect("could not render configuration");
        println!("{pretty}");
        return;
    }

    let rt = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .expect("could not build tokio runtime");
    let code = rt.block_on(configs.bind(boot(app, args)));
    std::process::exit(code);
}

async fn boot(app: App, args: Args) -> i32 {
    let registry = global();
    let work = workload();

    let stages = async {
        registry.install(MemoryCache::new()).await?;
        registry.install(MemoryLock::new()).await?;
        registry.install(ConfigCronStore::new()).await?;
        let scheduler = registry.install(Scheduler::new()).await?;

        let boot = Boot {
            registry: registry.clone(),
            scheduler: (*scheduler).clone(),
            work: work.clone(),
        };
        for stage in &app.setup {
            stage(boot.clone()).await?;
        }
        Ok::<_, crate::error::Error>(boot)
    };
    let boot = match stages.await {
        Ok(boot) => boot,
        Err(e) => {
            log::error!("{} failed to start: {e}", app.label);
            return 1;
        }
    };
    log::info!("{} started", app.label);

    let host = args.bind.as_deref().unwrap_or("0.0.0.0");
    let addr: SocketAddr = format!("{host}:{}", app.port)
        .parse()
        .expect("could not parse admin bind address");
    let cache: Arc<MemoryCache> = registry.get().expect("cache just installed");
    let state = AdminState {
        registry: registry.clone(),
        scheduler: boot.scheduler.clone(),
        cache,
        work: work.clone(),
    };
    work.spawn(async move {
        if let Err(e) = admin::serve(addr, state).await {
            log::error!("admin surface failed: {e}");
        }
    });

    shutdown::supervise(registry, work, shutdown::DEFAULT_DEADLINE).await
}
