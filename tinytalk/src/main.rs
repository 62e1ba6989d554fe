use clap::Parser as ClapParser;
use std::{fs, path::PathBuf, process, sync::Arc};

use tinytalk::{
    InterpreterCreateInfo, Reference, Runtime, RuntimeCreateInfo, Scheduler, load_image,
    map_image,
};

#[derive(ClapParser, Debug)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Image to start from
    image: PathBuf,

    /// Keep strings and byte arrays in the image buffer instead of copying them
    #[arg(long)]
    map: bool,

    /// Global holding the process (or block) to run
    #[arg(long, default_value = "systemProcess")]
    process: String,

    /// Bytecodes per time slice
    #[arg(long, default_value_t = 15000)]
    slice: usize,

    /// Print interpreter and memory statistics on exit
    #[arg(long)]
    stats: bool,
}

fn main() {
    env_logger::init();
    let cli = Cli::parse();

    let info = RuntimeCreateInfo {
        interpreter: InterpreterCreateInfo {
            time_slice: Some(cli.slice),
            ..Default::default()
        },
        ..Default::default()
    };
    let loaded = if cli.map {
        fs::read(&cli.image).and_then(|bytes| map_image(info, Arc::from(bytes)))
    } else {
        load_image(info, &cli.image)
    };
    let mut rt = match loaded {
        Ok(rt) => rt,
        Err(err) => {
            eprintln!("Error loading image '{}': {}", cli.image.display(), err);
            process::exit(1);
        }
    };

    let Some(target) = rt.global(&cli.process) else {
        eprintln!("No global named '{}' in the image", cli.process);
        process::exit(1);
    };
    let Some(process) = runnable(&mut rt, target) else {
        eprintln!("'{}' is neither a process nor a block", cli.process);
        process::exit(1);
    };

    let scheduler = Scheduler::new(rt);
    let slices = scheduler.run(process);

    if cli.stats {
        let rt = scheduler.runtime();
        let rt = rt.lock();
        println!("slices: {slices}");
        println!("{:#?}", rt.stats);
        println!("{:#?}", rt.memory.stats());
    }
}

fn runnable(rt: &mut Runtime, target: Reference) -> Option<Reference> {
    let class = rt.class_of(target);
    if class == rt.special.process_class {
        Some(target)
    } else if class == rt.special.block_class {
        Some(rt.new_block_process(target))
    } else {
        None
    }
}
