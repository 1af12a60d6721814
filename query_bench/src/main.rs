use std::error::Error;
use std::time::Instant;

use clap::Parser;

use shrec::{Cond, ConnectConfig, Connection, FieldValue, Predicate};

#[derive(clap::Parser)]
#[clap()]
struct Opts {
    #[clap(short = 'c', long = "config", default_value = "shrec-bench.toml")]
    config: String,
    #[clap(short = 'n', long = "records", default_value = "1000000")]
    records: i64,
}

fn main() -> Result<(), Box<dyn Error>> {
    tracing_subscriber::fmt().init();
    let opts: Opts = Opts::parse();
    let cfg: ConnectConfig = confy::load_path(&opts.config)?;
    let conn = shrec::connect(&cfg)?;
    run(&conn, opts.records)?;
    conn.close();
    Ok(())
}

fn run(conn: &Connection, records: i64) -> Result<(), Box<dyn Error>> {
    let start = Instant::now();
    for i in 0..records {
        conn.insert(&[i.into(), (i % 100).into(), "payload".into()])?;
        if i % 100_000 == 0 {
            eprint!("\rInserted {} records", i);
        }
    }
    let duration = start.elapsed();
    let iops = ((records as f64) / (duration.as_millis() as f64)) * 1_000f64;
    println!(
        "\n{:#?}K records inserted/s. Total time: {:#?}",
        (iops / 1000f64) as u64,
        duration
    );

    let start = Instant::now();
    let mut cur = conn.cursor()?;
    cur.execute(None, Some(&[Predicate::new(1, Cond::Equal, 42)]))?;
    let mut fetched = 0usize;
    let mut checksum = 0i64;
    while let Some(rec) = cur.fetchone()? {
        if let FieldValue::Int(v) = rec.get_field(0)? {
            checksum = checksum.wrapping_add(v);
        }
        fetched += 1;
        if fetched % 10_000 == 0 {
            eprint!("\rFetched {} records", fetched);
        }
    }
    cur.close()?;
    let duration = start.elapsed();
    println!(
        "\nQuery matched {} of {} records (rowcount {}, checksum {}). Total time: {:#?}",
        fetched,
        records,
        cur.rowcount(),
        checksum,
        duration
    );
    Ok(())
}
