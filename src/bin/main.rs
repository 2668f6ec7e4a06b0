//! Command-line driver for reading and rewriting UBI/NAND device images.
//!
//! This is the only layer permitted to do file I/O, logging, or progress
//! reporting; everything under [`ubi_image_tool`] is a pure decode/encode
//! core.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};

use ubi_image_tool::bootargs::BootArguments;
use ubi_image_tool::device_image::DeviceImage;
use ubi_image_tool::logging;
use ubi_image_tool::ubi::{UnsortedBlockImages, VolTableRecord};

#[derive(Parser)]
#[clap(author, version, about)]
struct Cli {
    /// Show info/debug-level diagnostics in addition to errors.
    #[clap(short, long, global = true)]
    verbose: bool,

    #[clap(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Extract every volume's contents (and any device image within them) to a directory.
    Read {
        image_path: PathBuf,
        extract_dir: PathBuf,

        /// Serialize the decoded UBI container's record metadata to this path as JSON.
        #[clap(long)]
        dump: Option<PathBuf>,
    },

    /// Replace one sub-payload of a device image volume and write a new NAND image.
    Write {
        image_path: PathBuf,
        volume_id: u32,

        #[clap(value_enum)]
        target: Target,

        update_path: PathBuf,
        output_path: PathBuf,
    },
}

#[derive(ValueEnum, Clone, Copy)]
enum Target {
    Fdt,
    Kernel,
    Ramdisk,
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    logging::init(cli.verbose);

    howudoin::init(howudoin::consumers::TermLine::default());
    if !cli.verbose {
        howudoin::disable();
    }

    match cli.command {
        Command::Read {
            image_path,
            extract_dir,
            dump,
        } => read_image(&image_path, &extract_dir, dump.as_deref()),

        Command::Write {
            image_path,
            volume_id,
            target,
            update_path,
            output_path,
        } => write_image(&image_path, volume_id, target, &update_path, &output_path),
    }
}

fn read_image(image_path: &Path, extract_dir: &Path, dump: Option<&Path>) -> Result<()> {
    let blob = fs::read(image_path)
        .with_context(|| format!("reading {}", image_path.display()))?;

    let (start, block_size, block_count) = ubi_image_tool::ubi::locate(&blob)
        .context("locating the UBI region")?;
    let ubi_end = start + block_size * block_count;

    log::info!(
        "found UBI region at 0x{start:08x}..0x{ubi_end:08x} (block size {})",
        ubi_image_tool::util::to_readable_size(block_size as u64)
    );

    let ubi = UnsortedBlockImages::decode(&blob).context("decoding the UBI container")?;
    let boot_arguments = BootArguments::parse(&blob).context("locating U-Boot boot arguments")?;

    fs::create_dir_all(extract_dir)
        .with_context(|| format!("creating {}", extract_dir.display()))?;

    write_if_nonempty(&extract_dir.join(format!("data-0x{start:08X}-0x{ubi_end:08X}.bin")), &blob[..start])?;
    write_if_nonempty(
        &extract_dir.join(format!("data-0x{ubi_end:08X}-0x{:08X}.bin", blob.len())),
        &blob[ubi_end..],
    )?;

    let volume_table = ubi.volume_table().context("enumerating the volume table")?;

    let rpt = howudoin::new()
        .label("Extracting volumes")
        .set_len(volume_table.len() as u64);

    let ubi_dir = extract_dir.join("ubi");
    for (volume_id, record) in volume_table {
        extract_volume(&ubi, *volume_id, record, &ubi_dir, &boot_arguments)?;
        rpt.inc();
    }
    rpt.close();

    if let Some(dump_path) = dump {
        dump_container(&blob, dump_path)?;
    }

    Ok(())
}

fn extract_volume(
    ubi: &UnsortedBlockImages,
    volume_id: u32,
    record: &VolTableRecord,
    ubi_dir: &Path,
    boot_arguments: &BootArguments,
) -> Result<()> {
    let payload = ubi.volume(volume_id, record.reserved_pebs);

    let volume_dir = ubi_dir.join(format!("volume-{volume_id}-{}", record.name));
    fs::create_dir_all(&volume_dir)
        .with_context(|| format!("creating {}", volume_dir.display()))?;
    fs::write(volume_dir.join("data.bin"), &payload)?;

    let device_image = match DeviceImage::decode(&payload) {
        Ok(image) => image,
        Err(_) => {
            log::debug!("volume {volume_id} ({}) is not a device image, skipping", record.name);
            return Ok(());
        }
    };

    let sha1_hex = device_image
        .header
        .image_sha1
        .iter()
        .map(|b| format!("{b:02X}"))
        .collect::<String>();
    let image_dir = volume_dir.join(format!("image-0x{sha1_hex}"));
    fs::create_dir_all(&image_dir)
        .with_context(|| format!("creating {}", image_dir.display()))?;

    if let Ok(offset) = boot_arguments.fdt_offset() {
        if let Ok(fdt) = device_image.get_fdt(offset) {
            fs::write(image_dir.join("fdt.bin"), fdt)?;
        }
    }
    if let Ok(offset) = boot_arguments.kernel_offset() {
        if let Ok(kernel) = device_image.get_kernel(offset) {
            fs::write(image_dir.join("kernel.bin"), kernel)?;
        }
    }
    if let Ok(offset) = boot_arguments.ramdisk_offset() {
        if let Ok(ramdisk) = device_image.get_ramdisk(offset) {
            fs::write(image_dir.join("ramdisk.bin"), ramdisk)?;
        }
    }

    Ok(())
}

fn write_if_nonempty(path: &Path, data: &[u8]) -> Result<()> {
    if !data.is_empty() {
        fs::write(path, data).with_context(|| format!("writing {}", path.display()))?;
    }
    Ok(())
}

fn dump_container(blob: &[u8], dump_path: &Path) -> Result<()> {
    let ubi = UnsortedBlockImages::decode(blob)?;
    let json = ubi.to_dump_json()?;
    fs::write(dump_path, json).with_context(|| format!("writing {}", dump_path.display()))?;
    Ok(())
}

fn write_image(
    image_path: &Path,
    volume_id: u32,
    target: Target,
    update_path: &Path,
    output_path: &Path,
) -> Result<()> {
    let blob = fs::read(image_path)
        .with_context(|| format!("reading {}", image_path.display()))?;

    let mut ubi = UnsortedBlockImages::decode(&blob).context("decoding the UBI container")?;
    let boot_arguments = BootArguments::parse(&blob).context("locating U-Boot boot arguments")?;
    let record = ubi.volume_record(volume_id)?.clone();

    let payload = ubi.volume(volume_id, record.reserved_pebs);
    let mut device_image = DeviceImage::decode(&payload)?;

    let update = fs::read(update_path)
        .with_context(|| format!("reading {}", update_path.display()))?;

    let offset = match target {
        Target::Fdt => boot_arguments.fdt_offset()?,
        Target::Kernel => boot_arguments.kernel_offset()?,
        Target::Ramdisk => boot_arguments.ramdisk_offset()?,
    };

    if matches!(target, Target::Kernel | Target::Ramdisk) {
        log::warn!(
            "replacing a uImage payload does not recompute its ih_hcrc/ih_dcrc fields; \
             the new image carries the old uImage's stale header/data CRCs"
        );
    }

    device_image.put(offset, &update)?;
    device_image.refresh_sha1();

    let new_payload = device_image.encode();
    ubi.put_volume_blocks(volume_id, &new_payload)
        .context("reinstalling the volume's blocks")?;

    let out = ubi.encode();

    fs::write(output_path, &out)
        .with_context(|| format!("writing {}", output_path.display()))?;

    log::info!("wrote {}", output_path.display());
    Ok(())
}
