//! Command line front end: dimension discovery, pipeline inspection, serving
//! signature and synthetic datasets.

use clap::{Args, Parser, Subcommand};
use glyph_patches::config::PatchesConfig;
use glyph_patches::context::TrainingContext;
use glyph_patches::data::encode_labeled_patch;
use glyph_patches::metrics::{LabelHistogram, RunningStd};
use glyph_patches::serialization::{create_records, save_batch};
use ndarray::Array2;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::collections::HashMap;
use std::error::Error;
use std::fs;
use std::path::PathBuf;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(author, version, about = "Glyph patch input pipeline tools", long_about = None)]
struct Cli {
    #[command(flatten)]
    options: ConfigArgs,

    #[command(subcommand)]
    command: Command,
}

/// Config file plus per-option overrides.
#[derive(Args, Debug)]
struct ConfigArgs {
    /// JSON config file; flags below override its values
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Glob of training TFRecords (also used to discover patch dimensions)
    #[arg(long, global = true)]
    train_input_patches: Option<String>,

    /// Glob of evaluation TFRecords
    #[arg(long, global = true)]
    eval_input_patches: Option<String>,

    #[arg(long, global = true)]
    model_dir: Option<PathBuf>,

    /// Multiply label weights by each record's `label_weight`
    /// (`--use-included-label-weight=false` turns it off)
    #[arg(
        long,
        global = true,
        num_args = 0..=1,
        require_equals = true,
        default_missing_value = "true"
    )]
    use_included_label_weight: Option<bool>,

    #[arg(long, global = true)]
    augmentation_x_shift_probability: Option<f32>,

    #[arg(long, global = true)]
    augmentation_max_rotation_degrees: Option<f32>,

    #[arg(long, global = true)]
    batch_size: Option<usize>,

    #[arg(long, global = true)]
    seed: Option<u64>,
}

impl ConfigArgs {
    fn load(&self) -> Result<PatchesConfig, Box<dyn Error>> {
        let mut config = match &self.config {
            Some(path) => PatchesConfig::from_json_file(path)?,
            None => PatchesConfig::default(),
        };
        if let Some(glob) = &self.train_input_patches {
            config.train_input_patches = Some(glob.clone());
        }
        if let Some(glob) = &self.eval_input_patches {
            config.eval_input_patches = Some(glob.clone());
        }
        if let Some(dir) = &self.model_dir {
            config.model_dir = Some(dir.clone());
        }
        if let Some(enabled) = self.use_included_label_weight {
            config.use_included_label_weight = enabled;
        }
        if let Some(p) = self.augmentation_x_shift_probability {
            config.augmentation_x_shift_probability = p;
        }
        if let Some(degrees) = self.augmentation_max_rotation_degrees {
            config.augmentation_max_rotation_degrees = degrees;
        }
        if let Some(batch_size) = self.batch_size {
            config.batch.batch_size = batch_size;
        }
        if self.seed.is_some() {
            config.seed = self.seed;
        }
        config.validate()?;
        Ok(config)
    }
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Print the patch dimensions discovered from the training glob
    Dimensions,

    /// Pull batches through the pipeline and report label and pixel statistics
    Inspect {
        /// Read the evaluation split instead of the training split
        #[arg(long)]
        eval: bool,

        /// Max batches to read; 0 reads a whole eval pass
        #[arg(long, default_value_t = 100)]
        batches: usize,

        /// Save the first batch as SafeTensors
        #[arg(long)]
        dump: Option<PathBuf>,
    },

    /// Print the serving signature as JSON
    Signature,

    /// Print the effective configuration as JSON
    ShowConfig,

    /// Write a synthetic labeled patch dataset
    Synth(SynthArgs),
}

#[derive(Args, Debug)]
struct SynthArgs {
    /// Output directory
    #[arg(long)]
    output: PathBuf,

    /// File name prefix
    #[arg(long, default_value = "patches")]
    prefix: String,

    #[arg(long, default_value_t = 2)]
    files: usize,

    /// Records per file
    #[arg(long, default_value_t = 64)]
    records: usize,

    #[arg(long, default_value_t = 18)]
    height: usize,

    #[arg(long, default_value_t = 15)]
    width: usize,

    #[arg(long, default_value_t = 3)]
    classes: i64,

    /// Also write a random `label_weight` in [0.5, 1.5)
    #[arg(long)]
    label_weight: bool,

    #[arg(long, default_value_t = 0)]
    synth_seed: u64,
}

fn main() -> Result<(), Box<dyn Error>> {
    init_tracing();
    let cli = Cli::parse();

    match cli.command {
        Command::Synth(args) => synth(&args),
        Command::ShowConfig => {
            println!("{}", cli.options.load()?.to_json_pretty()?);
            Ok(())
        }
        Command::Dimensions => {
            let context = TrainingContext::new(cli.options.load()?)?;
            println!("{}", context.read_patch_dimensions()?);
            Ok(())
        }
        Command::Signature => {
            let context = TrainingContext::new(cli.options.load()?)?;
            let receiver = context.serving_input_receiver()?;
            println!("{}", receiver.signature().to_json_pretty()?);
            Ok(())
        }
        Command::Inspect {
            eval,
            batches,
            dump,
        } => {
            let context = TrainingContext::new(cli.options.load()?)?;
            inspect(&context, eval, batches, dump)
        }
    }
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_writer(std::io::stderr)
        .init();
}

fn inspect(
    context: &TrainingContext,
    eval: bool,
    max_batches: usize,
    dump: Option<PathBuf>,
) -> Result<(), Box<dyn Error>> {
    let input_fn = if eval {
        context.eval_input_fn()?
    } else {
        context.train_input_fn()?
    };
    // The training stream never ends on its own.
    let limit = match (eval, max_batches) {
        (true, 0) => usize::MAX,
        (false, 0) => 100,
        (_, n) => n,
    };

    let mut histogram = LabelHistogram::new();
    let mut pixels = RunningStd::new();
    let mut batches = 0;
    for batch in input_fn()?.take(limit) {
        let batch = batch?;
        if batches == 0 {
            if let Some(path) = &dump {
                let metadata = HashMap::from([
                    ("split".to_string(), if eval { "eval" } else { "train" }.to_string()),
                    ("config".to_string(), context.config().to_json_pretty()?),
                ]);
                save_batch(path, &batch, Some(metadata))?;
                info!(path = %path.display(), examples = batch.len(), "saved first batch");
            }
        }
        histogram.update(&batch);
        pixels.update_batch(batch.patch.iter().map(|&v| f64::from(v)));
        batches += 1;
    }

    println!("dimensions: {}", context.read_patch_dimensions()?);
    println!("batches:    {batches}");
    println!("examples:   {}", histogram.total());
    println!("pixels:     mean {:.4} std {:.4}", pixels.mean(), pixels.std());
    println!("{:>8} {:>8} {:>12}", "label", "count", "weight");
    for (label, count, weight) in histogram.iter() {
        println!("{label:>8} {count:>8} {weight:>12.3}");
    }
    Ok(())
}

/// Writes `files` TFRecord files of dark bars on white background. The bar
/// column encodes the label, so the task is learnable.
fn synth(args: &SynthArgs) -> Result<(), Box<dyn Error>> {
    if args.classes <= 0 || args.height == 0 || args.width == 0 {
        return Err("classes, height and width must be positive".into());
    }
    fs::create_dir_all(&args.output)?;
    let mut rng = StdRng::seed_from_u64(args.synth_seed);

    for file in 0..args.files {
        let path = args.output.join(format!(
            "{}-{:05}-of-{:05}.tfrecords",
            args.prefix, file, args.files
        ));
        let mut writer = create_records(&path)?;
        for _ in 0..args.records {
            let label = rng.random_range(0..args.classes);
            let patch = synth_patch(args.height, args.width, label, args.classes, &mut rng);
            let label_weight = args.label_weight.then(|| rng.random_range(0.5f32..1.5));
            writer.write_record(&encode_labeled_patch(&patch, label, label_weight))?;
        }
        writer.flush()?;
        info!(path = %path.display(), records = args.records, "wrote synthetic patches");
    }
    Ok(())
}

fn synth_patch(height: usize, width: usize, label: i64, classes: i64, rng: &mut StdRng) -> Array2<f32> {
    let center = ((label as f32 + 0.5) / classes as f32 * width as f32) as usize;
    let column = center.min(width - 1);
    let top = rng.random_range(0..=height / 4);
    let bottom = height - rng.random_range(0..=height / 4);
    Array2::from_shape_fn((height, width), |(y, x)| {
        if x == column && (top..bottom).contains(&y) {
            ink(y)
        } else {
            1.0
        }
    })
}

/// Slight vertical texture so bars are not perfectly flat.
fn ink(y: usize) -> f32 {
    0.05 * (y % 3) as f32
}
