use classasm::comparator::{ComparatorCompiler, GenericComparator, KeyLayout, SortKey};
use classasm::record::{Column, ColumnKind, RecordComparator, Row};
use classasm::*;

use clap::{crate_version, value_parser, Arg, ArgAction, Command};
use std::fs;
use std::path::PathBuf;
use std::process;
use std::rc::Rc;

/// Number of rows `--check` compares pairwise
const SAMPLE_ROWS: usize = 48;

fn main() -> Result<(), comparator::Error> {
    env_logger::init();

    let matches = Command::new("Record comparator assembler")
        .version(crate_version!())
        .author("Alec Theriault <alec.theriault@gmail.com>")
        .about("Generate, verify, and exercise record comparator classes")
        .arg(
            Arg::new("key")
                .short('k')
                .long("key")
                .value_name("KIND:COLUMN[:asc|desc]")
                .action(ArgAction::Append)
                .value_parser(value_parser!(SortKey))
                .help("Add a sort key (eg. `int:0`, `double:3:desc`)"),
        )
        .arg(
            Arg::new("class")
                .long("class")
                .value_name("CLASS_FILE")
                .value_parser(value_parser!(PathBuf))
                .conflicts_with_all(["key", "check", "dump"])
                .help("Verify an existing class file instead of generating one"),
        )
        .arg(
            Arg::new("dump")
                .long("dump")
                .value_name("CLASS_FILE")
                .value_parser(value_parser!(PathBuf))
                .help("Write the generated class to this file"),
        )
        .arg(
            Arg::new("check")
                .long("check")
                .action(ArgAction::SetTrue)
                .help("Compare the generated comparator against the generic one on sample rows"),
        )
        .get_matches();

    if let Some(class_file) = matches.get_one::<PathBuf>("class") {
        log::info!("Reading and verifying '{}'", class_file.display());
        let bytes = fs::read(class_file).map_err(jvm::Error::IoError)?;
        let class = loader::load(&bytes)?;
        println!(
            "{}: ok ({} fields, {} methods, version {:?})",
            class.name(),
            class.fields().len(),
            class.methods().len(),
            class.version()
        );
        return Ok(());
    }

    let layout: KeyLayout = matches
        .get_many::<SortKey>("key")
        .into_iter()
        .flatten()
        .copied()
        .collect();

    let mut compiler = ComparatorCompiler::new();
    let bytes = compiler.generate(&layout)?;
    if let Some(dump) = matches.get_one::<PathBuf>("dump") {
        log::info!("Writing '{}'", dump.display());
        compiler.assembler().dump(dump)?;
    }
    let class = loader::load(&bytes)?;
    println!(
        "{}: ok ({} bytes) for layout '{}'",
        class.name(),
        bytes.len(),
        layout
    );

    if matches.get_flag("check") {
        let mismatches = check(&layout, class.new_instance()?);
        if mismatches > 0 {
            log::error!("{} comparisons disagree with the generic comparator", mismatches);
            process::exit(1);
        }
        println!("{} comparisons agree", SAMPLE_ROWS * SAMPLE_ROWS);
    }

    Ok(())
}

/// Rows with few distinct values per column, so that later keys get to break ties
fn sample_rows(layout: &KeyLayout) -> Vec<Row> {
    let width = layout
        .keys
        .iter()
        .map(|key| key.column as usize + 1)
        .max()
        .unwrap_or(0);
    let mut kinds = vec![ColumnKind::Int; width];
    for key in &layout.keys {
        kinds[key.column as usize] = key.kind;
    }

    // Fixed linear congruential sequence keeps runs reproducible
    let mut state: u64 = 0x2545_F491_4F6C_DD1D;
    let mut next = move || {
        state = state
            .wrapping_mul(6_364_136_223_846_793_005)
            .wrapping_add(1_442_695_040_888_963_407);
        (state >> 33) as i64 % 7 - 3
    };

    (0..SAMPLE_ROWS)
        .map(|_| {
            let columns = kinds
                .iter()
                .map(|kind| {
                    let value = next();
                    match kind {
                        ColumnKind::Int => Column::Int(value as i32),
                        ColumnKind::Long => Column::Long(value << 40),
                        ColumnKind::Double if value == 3 => Column::Double(f64::NAN),
                        ColumnKind::Double => Column::Double(value as f64 / 2.0),
                    }
                })
                .collect();
            Row::new(columns)
        })
        .collect()
}

fn check(layout: &KeyLayout, mut generated: impl RecordComparator) -> usize {
    let rows = sample_rows(layout);
    let mut generic = GenericComparator::new(layout.clone());
    let mut mismatches = 0;
    for left in &rows {
        let left = Rc::new(left.clone());
        generated.set_left(left.clone());
        generic.set_left(left.clone());
        for right in &rows {
            let expected = generic.compare(right);
            let actual = generated.compare(right);
            if expected.signum() != actual.signum() {
                log::warn!(
                    "{:?} vs {:?}: expected {}, got {}",
                    left,
                    right,
                    expected,
                    actual
                );
                mismatches += 1;
            }
        }
    }
    mismatches
}
