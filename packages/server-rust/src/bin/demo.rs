//! Drives an echo component from many threads and prints pool statistics.

use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::Context as _;
use clap::Parser;
use ironbean_container::{
    BeanException, ComponentDeployment, ContainerConfig, ContainerError, DeploymentId,
    InterceptorData, InvocationRequest, LocalTransactionManager, PermitAll, StatelessContainer,
};
use ironbean_core::{InterfaceType, Method, Value};
use tracing::{debug, info};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "ironbean-demo", version, about = "Concurrent calls against a pooled echo component")]
struct Args {
    /// Caller threads.
    #[arg(long, env = "IRONBEAN_THREADS", default_value_t = 4)]
    threads: usize,

    /// Calls made by each thread.
    #[arg(long, env = "IRONBEAN_CALLS", default_value_t = 250)]
    calls: usize,

    /// Pool size override.
    #[arg(long, env = "IRONBEAN_MAX_SIZE")]
    max_size: Option<usize>,

    /// Instance wait override, in milliseconds.
    #[arg(long, env = "IRONBEAN_ACCESS_TIMEOUT_MS")]
    access_timeout_ms: Option<u64>,

    /// Every Nth call raises a system exception (0 = never).
    #[arg(long, default_value_t = 0)]
    fail_every: usize,

    /// JSON container configuration file.
    #[arg(long, env = "IRONBEAN_CONFIG")]
    config: Option<PathBuf>,

    /// Emit logs as JSON.
    #[arg(long)]
    json: bool,
}

struct EchoBean {
    served: u64,
}

struct CallLogger;

#[derive(Debug, Default)]
struct Tally {
    ok: AtomicU64,
    system: AtomicU64,
    timeout: AtomicU64,
    other: AtomicU64,
}

impl Tally {
    fn record(&self, result: &Result<ironbean_container::InvocationResponse, ContainerError>) {
        let counter = match result {
            Ok(_) => &self.ok,
            Err(ContainerError::System { .. }) => &self.system,
            Err(e) if e.is_retryable() => &self.timeout,
            Err(_) => &self.other,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }
}

fn init_tracing(json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

fn load_config(args: &Args) -> anyhow::Result<ContainerConfig> {
    let mut config = match &args.config {
        Some(path) => {
            let text = std::fs::read_to_string(path)
                .with_context(|| format!("reading {}", path.display()))?;
            serde_json::from_str(&text).with_context(|| format!("parsing {}", path.display()))?
        }
        None => ContainerConfig::default(),
    };
    if let Some(max_size) = args.max_size {
        config.pool.max_size = max_size;
    }
    if let Some(ms) = args.access_timeout_ms {
        config.access_timeout = Duration::from_millis(ms);
    }
    config.stats_enabled = true;
    Ok(config)
}

fn echo_deployment() -> Result<ComponentDeployment, ContainerError> {
    let logger = InterceptorData::new("CallLogger").around_invoke(|_: &CallLogger, ctx| {
        debug!(
            method = ctx.method_name().unwrap_or_default(),
            params = ctx.parameters().len(),
            "calling"
        );
        ctx.proceed()
    });
    ComponentDeployment::builder("Echo", "EchoBean")
        .interface("EchoLocal", InterfaceType::BusinessLocal)
        .bean(|_| Ok(EchoBean { served: 0 }))
        .method("process", 1, |bean: &mut EchoBean, args| {
            bean.served += 1;
            let text = args.first().and_then(Value::as_str).unwrap_or_default();
            Ok(Value::from(format!("{text}-processed")))
        })
        .method("fail", 0, |_: &mut EchoBean, _| {
            Err(BeanException::new("DemoFailure", "requested failure"))
        })
        .interceptor(logger, |_| Ok(CallLogger))
        .build()
}

fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    init_tracing(args.json);

    let config = load_config(&args)?;
    let container = StatelessContainer::new(
        "demo",
        config,
        Arc::new(PermitAll),
        Arc::new(LocalTransactionManager::new()),
    )?;
    let id = DeploymentId::from("Echo");
    container.deploy(echo_deployment()?)?;
    container.start(&id)?;

    let tally = Tally::default();
    let started = Instant::now();
    std::thread::scope(|scope| {
        for thread in 0..args.threads {
            let (container, tally) = (&container, &tally);
            let (calls, fail_every) = (args.calls, args.fail_every);
            scope.spawn(move || {
                for n in 1..=calls {
                    let request = if fail_every > 0 && n % fail_every == 0 {
                        InvocationRequest::business("Echo", Method::business("EchoLocal", "fail"), vec![])
                    } else {
                        InvocationRequest::business(
                            "Echo",
                            Method::business("EchoLocal", "process"),
                            vec![Value::from(format!("t{thread}-{n}"))],
                        )
                    };
                    tally.record(&container.invoke(request));
                }
            });
        }
    });
    let elapsed = started.elapsed();

    info!(
        ok = tally.ok.load(Ordering::Relaxed),
        system = tally.system.load(Ordering::Relaxed),
        timeout = tally.timeout.load(Ordering::Relaxed),
        other = tally.other.load(Ordering::Relaxed),
        elapsed_ms = u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX),
        "run complete"
    );

    let summary = serde_json::json!({
        "pool": container.stats(&id),
        "methods": container.invocation_stats(&id),
    });
    println!("{}", serde_json::to_string_pretty(&summary)?);

    container.shutdown();
    Ok(())
}
