use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;

/// Write a sample CSV with blanks, duplicates and a few malformed rows.
#[derive(Parser, Debug)]
struct Args {
    /// Output path.
    #[arg(default_value = "sample_data.csv")]
    output: PathBuf,

    /// Number of rows to generate.
    #[arg(short, long, default_value_t = 1000)]
    rows: usize,

    /// PRNG seed; the same seed always produces the same file.
    #[arg(short, long, default_value_t = 42)]
    seed: u64,
}

/// Minimal deterministic PRNG (xoshiro256**)
struct SimpleRng {
    state: [u64; 4],
}

impl SimpleRng {
    fn new(seed: u64) -> Self {
        let mut s = [0u64; 4];
        let mut x = seed;
        for slot in &mut s {
            x = x.wrapping_mul(6364136223846793005).wrapping_add(1);
            *slot = x;
        }
        SimpleRng { state: s }
    }

    fn next_u64(&mut self) -> u64 {
        let result = (self.state[1].wrapping_mul(5))
            .rotate_left(7)
            .wrapping_mul(9);
        let t = self.state[1] << 17;
        self.state[2] ^= self.state[0];
        self.state[3] ^= self.state[1];
        self.state[1] ^= self.state[2];
        self.state[0] ^= self.state[3];
        self.state[2] ^= t;
        self.state[3] = self.state[3].rotate_left(45);
        result
    }

    fn next_f64(&mut self) -> f64 {
        (self.next_u64() >> 11) as f64 / (1u64 << 53) as f64
    }

    fn chance(&mut self, p: f64) -> bool {
        self.next_f64() < p
    }

    fn pick<'a>(&mut self, items: &[&'a str]) -> &'a str {
        items[(self.next_u64() % items.len() as u64) as usize]
    }
}

const FIRST_NAMES: [&str; 8] = [
    "Ada", "Grace", "Alan", "Edsger", "Barbara", "Ken", "Frances", "Niklaus",
];
const CITIES: [&str; 6] = [
    "London", "New York", "Zurich", "Amsterdam", "Austin, TX", "Kyoto",
];
const PLANS: [&str; 3] = ["free", "pro", "enterprise"];

fn main() -> Result<()> {
    let args = Args::parse();
    let mut rng = SimpleRng::new(args.seed);

    let mut writer = csv::WriterBuilder::new()
        .flexible(true)
        .from_path(&args.output)
        .with_context(|| format!("creating {}", args.output.display()))?;
    writer.write_record(["id", "name", "city", "plan", "signup_day"])?;

    let mut written: Vec<[String; 5]> = Vec::new();
    let (mut blanks, mut duplicates, mut malformed) = (0usize, 0usize, 0usize);

    for i in 0..args.rows {
        // Repeat an earlier row verbatim
        if !written.is_empty() && rng.chance(0.15) {
            let j = (rng.next_u64() % written.len() as u64) as usize;
            writer.write_record(&written[j])?;
            duplicates += 1;
            continue;
        }
        // Wrong field count
        if rng.chance(0.01) {
            writer.write_record(["broken", "row"])?;
            malformed += 1;
            continue;
        }

        let mut row = [
            format!("{}", 1000 + i),
            rng.pick(&FIRST_NAMES).to_string(),
            rng.pick(&CITIES).to_string(),
            rng.pick(&PLANS).to_string(),
            format!("{}", 1 + rng.next_u64() % 365),
        ];
        if rng.chance(0.1) {
            let col = 1 + (rng.next_u64() % 4) as usize;
            row[col].clear();
            blanks += 1;
        }
        writer.write_record(&row)?;
        written.push(row);
    }
    writer.flush()?;

    println!("Wrote {} rows to {}", args.rows, args.output.display());
    println!("  {blanks} with a blank field, {duplicates} duplicates, {malformed} malformed");
    Ok(())
}
