// SPDX-FileCopyrightText: 2025 tegra-host contributors
// SPDX-License-Identifier: GPL-3.0-or-later

mod config;

use anyhow::{bail, Context, Result};
use clap::{Parser, ValueEnum};
use log::info;
use std::path::PathBuf;
use std::sync::Arc;

use host1x::chip::t20::{MODMUTEX_3D, SYNCPT_2D_0, SYNCPT_3D};
use host1x::opcodes;
use host1x::HostEngine;
use nvhost::devices::{channel, ctrl, NVHOST_NO_TIMEOUT};
use nvhost::{ioctl_code, NvhostDriver};

#[derive(ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
enum Scenario {
    /// Two serialized gr2d jobs on one channel
    Blit,
    /// gr3d waits in its command stream for a gr2d syncpoint
    Pipeline,
    /// A CPU-held module mutex holds off a gr3d submit
    Mutex,
    All,
}

/// tegra-host - Tegra20 host1x channel and syncpoint manager
#[derive(Parser, Debug)]
#[command(name = "tegra-host", version, about = "Tegra20 host1x channel and syncpoint manager")]
struct Args {
    /// Path to host1x.ini (default: auto-detect)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,

    /// Scenario to drive through the nvhost nodes
    #[arg(short, long, value_enum, default_value_t = Scenario::All)]
    scenario: Scenario,

    /// Service interrupts inline instead of on the interrupt thread
    #[arg(long)]
    polled: bool,
}

fn main() -> Result<()> {
    let args = Args::parse();

    let log_level = if args.verbose { "debug" } else { "info" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(log_level))
        .format_timestamp_millis()
        .init();

    info!("tegra-host - host1x channel and syncpoint manager");

    let mut settings = config::load_config(args.config.as_ref());
    if args.polled {
        settings.irq_thread = false;
    }

    let engine = HostEngine::with_t20(settings).context("Failed to bring up host1x")?;
    let mut drv = NvhostDriver::new(Arc::new(engine));
    info!("Nodes: {}", drv.device_paths().join(" "));

    let scenarios: &[Scenario] = match args.scenario {
        Scenario::All => &[Scenario::Blit, Scenario::Pipeline, Scenario::Mutex],
        ref one => std::slice::from_ref(one),
    };
    for &scenario in scenarios {
        info!("Running scenario {:?}", scenario);
        match scenario {
            Scenario::Blit => run_blit(&mut drv),
            Scenario::Pipeline => run_pipeline(&mut drv),
            Scenario::Mutex => run_mutex(&mut drv),
            Scenario::All => Ok(()),
        }
        .with_context(|| format!("Scenario {:?} failed", scenario))?;
    }

    println!("{}", drv.engine().debug_snapshot());
    info!("Done");
    Ok(())
}

fn words(args: &[u32]) -> Vec<u8> {
    args.iter().flat_map(|w| w.to_le_bytes()).collect()
}

fn out_word(buf: &[u8], index: usize) -> u32 {
    let mut b = [0u8; 4];
    b.copy_from_slice(&buf[index * 4..index * 4 + 4]);
    u32::from_le_bytes(b)
}

fn ioctl(drv: &mut NvhostDriver, fd: u32, nr: u32, input: &[u8], output: &mut [u8]) -> Result<()> {
    match drv.ioctl(fd, ioctl_code(nr, input.len() as u32), input, output) {
        0 => Ok(()),
        errno => bail!("ioctl {} on fd {} failed with errno {}", nr, fd, errno),
    }
}

fn open(drv: &mut NvhostDriver, path: &str) -> Result<u32> {
    drv.open(path)
        .map_err(|errno| anyhow::anyhow!("open {} failed with errno {}", path, errno))
}

/// Submit `cmds` with `incrs` as `(syncpoint, count)` pairs. Returns the
/// first fence as `(syncpoint, threshold)`.
fn submit(drv: &mut NvhostDriver, fd: u32, cmds: &[u32], incrs: &[(u32, u32)]) -> Result<(u32, u32)> {
    let mut args = vec![incrs.len() as u32, cmds.len() as u32];
    for &(id, n) in incrs {
        args.extend([id, n]);
    }
    args.extend_from_slice(cmds);

    let mut fence = [0u8; 8];
    ioctl(drv, fd, channel::SUBMIT, &words(&args), &mut fence)?;
    Ok((out_word(&fence, 0), out_word(&fence, 1)))
}

fn wait(drv: &mut NvhostDriver, ctl: u32, id: u32, threshold: u32) -> Result<u32> {
    let mut out = [0u8; 16];
    ioctl(
        drv,
        ctl,
        ctrl::SYNCPT_WAITEX,
        &words(&[id, threshold, 1000, 0]),
        &mut out,
    )?;
    Ok(out_word(&out, 3))
}

fn read(drv: &mut NvhostDriver, ctl: u32, nr: u32, id: u32) -> Result<u32> {
    let mut out = [0u8; 8];
    ioctl(drv, ctl, nr, &words(&[id]), &mut out)?;
    Ok(out_word(&out, 1))
}

fn run_blit(drv: &mut NvhostDriver) -> Result<()> {
    let ctl = open(drv, "/dev/nvhost-ctrl")?;
    let gr2d = open(drv, "/dev/nvhost-gr2d")?;

    let cmds = [opcodes::setclass(opcodes::GRAPHICS_2D_CLASS_ID, 0, 0), opcodes::NOOP];
    let (id, first) = submit(drv, gr2d, &cmds, &[(SYNCPT_2D_0, 1)])?;
    info!("blit: job A fence {}:{}", id, first);

    // The second job cannot start until the first one's fence is reached.
    ioctl(drv, gr2d, channel::SET_TIMEOUT, &words(&[5]), &mut [])?;
    if submit(drv, gr2d, &cmds, &[(SYNCPT_2D_0, 1)]).is_ok() {
        bail!("gr2d accepted a job while its predecessor was pending");
    }
    info!("blit: job B held off while A is pending");

    drv.engine().run_channels()?;
    let value = wait(drv, ctl, id, first)?;
    info!("blit: job A done, syncpoint {} = {}", id, value);

    ioctl(drv, gr2d, channel::SET_TIMEOUT, &words(&[0]), &mut [])?;
    let (_, second) = submit(drv, gr2d, &cmds, &[(SYNCPT_2D_0, 1)])?;
    drv.engine().run_channels()?;
    let value = wait(drv, ctl, id, second)?;
    info!("blit: job B done, syncpoint {} = {}", id, value);

    drv.close(gr2d);
    drv.close(ctl);
    Ok(())
}

fn run_pipeline(drv: &mut NvhostDriver) -> Result<()> {
    let ctl = open(drv, "/dev/nvhost-ctrl")?;
    let producer = open(drv, "/dev/nvhost-gr2d")?;
    let consumer = open(drv, "/dev/nvhost-gr3d")?;

    let target = read(drv, ctl, ctrl::SYNCPT_READ_MAX, SYNCPT_2D_0)? + 1;
    let gated = [
        opcodes::setclass(opcodes::HOST1X_CLASS_ID, opcodes::UCLASS_WAIT_SYNCPT, 1),
        opcodes::wait_syncpt(SYNCPT_2D_0, target),
        opcodes::setclass(opcodes::GRAPHICS_3D_CLASS_ID, 0, 0),
    ];
    let (_, done) = submit(drv, consumer, &gated, &[(SYNCPT_3D, 1)])?;
    drv.engine().run_channels()?;
    let stalled = read(drv, ctl, ctrl::SYNCPT_READ, SYNCPT_3D)?;
    info!("pipeline: gr3d stalled at syncpoint {} = {} (fence {})", SYNCPT_3D, stalled, done);

    let (_, produced) = submit(drv, producer, &[], &[(SYNCPT_2D_0, 1)])?;
    if produced != target {
        bail!("producer fence {} does not match the consumer's target {}", produced, target);
    }
    drv.engine().run_channels()?;
    let value = wait(drv, ctl, SYNCPT_3D, done)?;
    info!("pipeline: gr3d released, syncpoint {} = {}", SYNCPT_3D, value);

    drv.close(consumer);
    drv.close(producer);
    drv.close(ctl);
    Ok(())
}

fn run_mutex(drv: &mut NvhostDriver) -> Result<()> {
    let ctl = open(drv, "/dev/nvhost-ctrl")?;
    let gr3d = open(drv, "/dev/nvhost-gr3d")?;

    ioctl(drv, ctl, ctrl::MODULE_MUTEX, &words(&[MODMUTEX_3D, 1]), &mut [0u8; 8])?;
    if submit(drv, gr3d, &[], &[(SYNCPT_3D, 1)]).is_ok() {
        bail!("gr3d submitted while the CPU held its module mutex");
    }
    info!("mutex: gr3d submit refused while mutex {} is held", MODMUTEX_3D);

    ioctl(drv, ctl, ctrl::MODULE_MUTEX, &words(&[MODMUTEX_3D, 0]), &mut [0u8; 8])?;
    let (id, threshold) = submit(drv, gr3d, &[], &[(SYNCPT_3D, 1)])?;
    drv.engine().run_channels()?;

    let mut out = [0u8; 16];
    let args = words(&[id, threshold, NVHOST_NO_TIMEOUT as u32, 0]);
    ioctl(drv, ctl, ctrl::SYNCPT_WAITEX, &args, &mut out)?;
    info!("mutex: gr3d job done, syncpoint {} = {}", id, out_word(&out, 3));

    drv.close(gr3d);
    drv.close(ctl);
    Ok(())
}
