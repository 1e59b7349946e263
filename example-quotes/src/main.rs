mod rates {
    use std::time::Duration;

    use futures::future::BoxFuture;
    use kumiko::{
        CacheOptions, CacheSource, Cacheable, Component, Configs, LockOptions, LockSource,
        Lockable, MemoryCache, MemoryLock, Result, When,
    };

    /// A pretend exchange-rate service: conversions are cached, refreshes
    /// are serialized across callers.
    pub struct Rates {
        convert_cache: Cacheable,
        refresh_lock: Lockable,
        dump_gate: When,
    }

    impl Rates {
        pub fn new() -> Rates {
            Rates {
                convert_cache: Cacheable::new(
                    "Rates",
                    "convert",
                    CacheSource::component::<MemoryCache>(),
                )
                .options(CacheOptions::new().expires_in(Duration::from_secs(30))),
                refresh_lock: Lockable::new(
                    "Rates",
                    "refresh",
                    LockSource::component::<MemoryLock>(),
                )
                .options(
                    LockOptions::new()
                        .timeout(Duration::from_secs(5))
                        .ttl(Duration::from_secs(30))
                        .random_auth(),
                ),
                dump_gate: When::with(|| {
                    Configs::current()
                        .map(|c| c.get_or("debug.enabled", false))
                        .unwrap_or(false)
                }),
            }
        }

        /// Quote `amount` cents into `currency`, served from the cache
        /// within its freshness window.
        pub async fn convert(&self, currency: String, amount: u64) -> Result<u64> {
            self.convert_cache
                .call((currency, amount), |(currency, amount)| async move {
                    let rate = match currency.as_str() {
                        "eur" => 92,
                        "gbp" => 79,
                        _ => 100,
                    };
                    Ok(amount * rate / 100)
                })
                .await
        }

        /// Pull a fresh rate table. Concurrent refreshes collapse onto the
        /// lock; losers wait rather than double-fetch.
        pub async fn refresh(&self) -> Result<()> {
            self.refresh_lock
                .call((), |_| async {
                    // Stands in for an upstream feed round-trip.
                    tokio::time::sleep(Duration::from_millis(50)).await;
                    log::info!("refreshing rate table");
                    Ok(())
                })
                .await
        }

        /// Dev-only: render the table. Gated off unless `debug.enabled`.
        pub async fn dump(&self) -> Result<String> {
            self.dump_gate
                .call(|| async { Ok("eur=0.92 gbp=0.79".to_owned()) })
                .await
        }
    }

    impl Component for Rates {
        const LABEL: &'static str = "rates";

        fn on_init(&self) -> BoxFuture<'_, Result<()>> {
            Box::pin(async {
                log::info!("rate table warmed");
                Ok(())
            })
        }

        fn on_stop(&self) -> BoxFuture<'_, Result<()>> {
            Box::pin(async {
                log::info!("rate table dropped");
                Ok(())
            })
        }
    }

    impl Default for Rates {
        fn default() -> Self {
            Rates::new()
        }
    }
}

mod refresher {
    use std::sync::Arc;

    use kumiko::{Component, Result, Runner, TaskDecl, global};

    use crate::rates::Rates;

    /// Keeps the rate table warm on a schedule.
    #[derive(Default)]
    pub struct Refresher;

    impl Component for Refresher {
        const LABEL: &'static str = "refresher";
    }

    impl Runner for Refresher {
        fn tasks() -> Vec<TaskDecl<Self>> {
            vec![
                TaskDecl::new("tick", "0 */5 * * * *", |_: Arc<Refresher>| async move {
                    let rates = global().get::<Rates>()?;
                    rates.refresh().await
                }),
                TaskDecl::new("warmup", "* * * * * *", |_: Arc<Refresher>| async move {
                    let rates = global().get::<Rates>()?;
                    let quoted = rates.convert("eur".to_owned(), 100).await?;
                    log::info!("warmup quote: {quoted}");
                    Ok(())
                })
                .once(),
            ]
        }
    }
}

mod app {
    use kumiko::{App, Boot};

    use crate::{rates::Rates, refresher::Refresher};

    pub fn configure() -> App {
        App::new("quotes").setup(|boot: Boot| async move {
            let rates = boot.registry.install(Rates::new()).await?;
            boot.scheduler
                .mount(&boot.registry, Refresher::default)
                .await?;
            if let Ok(table) = rates.dump().await {
                log::debug!("{table}");
            }
            Ok(())
        })
    }
}

fn main() {
    env_logger::init();
    kumiko::entry::main(app::configure());
}
