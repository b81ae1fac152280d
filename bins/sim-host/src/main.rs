mod sim;

use anyhow::{Context, bail};
use sim::PointMass;
use tessera_config::ChannelConfig;
use tessera_ipc::{SharedSemaphore, TensorChannel};
use tessera_tensor::Tensor;
use tracing::{debug, info};
use tracing_subscriber::EnvFilter;

const START_POSITION: f32 = 2.0;

fn main() -> anyhow::Result<()> {
    let config = load_config()?;
    init_tracing(&config.log_level);

    // The host owns every shared object; the learner only attaches.
    let mut channel = TensorChannel::create(&config.arena_name, config.capacity)
        .context("failed to create arena")?;
    let ready = SharedSemaphore::create(&config.ready_semaphore, 0)
        .context("failed to create ready semaphore")?;
    let free = SharedSemaphore::create(&config.free_semaphore, 0)
        .context("failed to create free semaphore")?;

    info!(
        arena = channel.store().name(),
        steps = config.steps,
        "SIM-HOST: waiting for learner"
    );

    let mut body = PointMass::new(START_POSITION);
    for step in 0..config.steps {
        let obs = Tensor::from_f32(body.observe());
        channel
            .send_tensor(&config.observation_key, &obs)
            .with_context(|| format!("failed to send observation at step {step}"))?;
        ready.post()?;

        if !free.wait_timeout(config.attach_timeout())? {
            bail!(
                "learner did not answer step {step} within {:?}",
                config.attach_timeout()
            );
        }

        let action = channel
            .receive::<i32>(&config.action_key)?
            .with_context(|| format!("learner signalled without '{}'", config.action_key))?;
        let action = *action.first().context("learner sent an empty action")?;

        body.step(action);
        debug!(step, action, position = body.position, velocity = body.velocity, "tick");
        if step % 20 == 0 {
            info!(step, position = body.position, "SIM-HOST: progress");
        }
    }

    info!(
        position = body.position,
        velocity = body.velocity,
        "SIM-HOST: episode complete"
    );
    Ok(())
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
