//! Compare stage-1 refined orientations and cells against the ground truth recorded by
//! the simulation, printing misorientation and unit-cell statistics over all shots.

use clap::Parser;

use sfxkit_core::{SfxError, SfxResult};
use sfxkit_pipeline::stage1::compare_stage1;

#[derive(Parser)]
#[command(name = "stage1-compare", about = "Stage-1 results vs ground truth")]
struct Args {
    /// Stage-1 orientation table (Parquet with a0..a8, u0..u8 and cell metadata)
    table: String,
}

fn main() -> SfxResult<()> {
    env_logger::init();
    let args = Args::parse();
    let comparison = compare_stage1(&args.table)?;
    if comparison.is_empty() {
        return Err(SfxError::Custom(
            "no shots found in the stage-1 table".to_string(),
        ));
    }
    print!("{}", comparison.summary());
    Ok(())
}
