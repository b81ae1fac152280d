mod policy;

use anyhow::{Context, anyhow, bail};
use std::time::{Duration, Instant};
use tessera_config::ChannelConfig;
use tessera_ipc::{SharedSemaphore, TensorChannel};
use tessera_tensor::DType;
use tracing::{debug, info, warn};
use tracing_subscriber::EnvFilter;

fn main() -> anyhow::Result<()> {
    let config = load_config()?;
    init_tracing(&config.log_level);

    let (mut channel, ready, free) = attach(&config)?;
    info!(arena = channel.store().name(), "LEARNER: attached");

    for step in 0..config.steps {
        ready.wait()?;

        let obs = channel
            .receive_tensor(&config.observation_key)?
            .with_context(|| format!("host signalled without '{}'", config.observation_key))?;
        if obs.dtype() != DType::Float32 {
            bail!("observation at step {step} is {}, expected float32", obs.dtype());
        }
        let values = obs.as_f32().unwrap_or_default();
        let action = policy::act(values)
            .ok_or_else(|| anyhow!("observation at step {step} has shape {:?}", obs.shape()))?;

        channel.send(&config.action_key, &[action])?;
        free.post()?;
        debug!(step, ?values, action, "answered");
    }

    info!(steps = config.steps, "LEARNER: done");
    Ok(())
}

/// Attach to the host's objects, retrying until they exist or the configured
/// timeout passes.
fn attach(
    config: &ChannelConfig,
) -> anyhow::Result<(TensorChannel, SharedSemaphore, SharedSemaphore)> {
    let deadline = Instant::now() + config.attach_timeout();
    let mut warned = false;
    loop {
        let attempt = || -> anyhow::Result<_> {
            let channel = TensorChannel::attach(&config.arena_name)?;
            let ready = SharedSemaphore::attach(&config.ready_semaphore)?;
            let free = SharedSemaphore::attach(&config.free_semaphore)?;
            Ok((channel, ready, free))
        };
        match attempt() {
            Ok(handles) => return Ok(handles),
            Err(e) if Instant::now() < deadline => {
                if !warned {
                    warn!(error = %e, "LEARNER: host not ready, retrying");
                    warned = true;
                }
                std::thread::sleep(Duration::from_millis(10));
            }
            Err(e) => {
                return Err(e).with_context(|| {
                    format!("host objects did not appear within {:?}", config.attach_timeout())
                });
            }
        }
    }
}

fn load_config() -> anyhow::Result<ChannelConfig> {
    match std::env::args().nth(1) {
        Some(path) => ChannelConfig::load(path.clone())
            .with_context(|| format!("failed to load config '{path}'")),
        None => Ok(ChannelConfig::default()),
    }
}

fn init_tracing(level: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}
