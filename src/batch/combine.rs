// src/batch/combine.rs
use std::{
    fs::File,
    io::{BufRead, BufReader, BufWriter, Write},
    path::{Path, PathBuf},
};
use tracing::info;

use crate::carbon::CarbonSeries;
use crate::error::{require_input, PipelineError, Result};

/// Concatenate headed CSVs into `output`, keeping the first header only.
/// Returns the number of data rows written.
pub fn concat_csv(inputs: &[PathBuf], output: &Path) -> Result<usize> {
    let file = File::create(output).map_err(|e| PipelineError::io(output, e))?;
    let mut out = BufWriter::new(file);
    let mut header: Option<(String, &Path)> = None;
    let mut rows = 0usize;

    for input in inputs {
        require_input(input)?;
        let file = File::open(input).map_err(|e| PipelineError::io(input, e))?;
        let mut lines = BufReader::new(file).lines();

        let first = match lines.next() {
            Some(line) => line.map_err(|e| PipelineError::io(input, e))?,
            None => return Err(PipelineError::format(input, "line 1", "missing header row")),
        };
        match &header {
            None => {
                writeln!(out, "{}", first).map_err(|e| PipelineError::io(output, e))?;
                header = Some((first, input.as_path()));
            }
            Some((expected, from)) if *expected != first => {
                return Err(PipelineError::DataIntegrity(format!(
                    "header of `{}` differs from `{}`",
                    input.display(),
                    from.display()
                )));
            }
            Some(_) => {}
        }

        for line in lines {
            let line = line.map_err(|e| PipelineError::io(input, e))?;
            if line.is_empty() {
                continue;
            }
            writeln!(out, "{}", line).map_err(|e| PipelineError::io(output, e))?;
            rows += 1;
        }
    }

    out.flush().map_err(|e| PipelineError::io(output, e))?;
    info!(inputs = inputs.len(), rows, path = %output.display(), "concatenated tables");
    Ok(rows)
}

/// Merge `carbon.json` files in order; a later stand replaces an earlier one in place.
pub fn merge_carbon(inputs: &[PathBuf], output: &Path) -> Result<CarbonSeries> {
    let mut merged = CarbonSeries::default();
    for input in inputs {
        merged.merge(CarbonSeries::read_json(input)?);
    }
    merged.write_json(output)?;
    info!(inputs = inputs.len(), stands = merged.len(), path = %output.display(), "merged carbon series");
    Ok(merged)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::carbon::CarbonRecord;
    use std::{collections::BTreeMap, fs};

    #[test]
    fn single_header_survives() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let a = dir.path().join("a.csv");
        let b = dir.path().join("b.csv");
        fs::write(&a, "holding,unit\n1,10\n1,11\n")?;
        fs::write(&b, "holding,unit\n1,20\n")?;
        let out = dir.path().join("all.csv");

        assert_eq!(concat_csv(&[a, b], &out)?, 3);
        assert_eq!(fs::read_to_string(&out)?, "holding,unit\n1,10\n1,11\n1,20\n");
        Ok(())
    }

    #[test]
    fn mismatched_headers_are_rejected() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let a = dir.path().join("a.csv");
        let b = dir.path().join("b.csv");
        fs::write(&a, "holding,unit\n1,10\n")?;
        fs::write(&b, "holding,unit,schedule\n1,20,0\n")?;
        let err = concat_csv(&[a, b], &dir.path().join("all.csv")).unwrap_err();
        assert!(matches!(err, PipelineError::DataIntegrity(_)), "{err}");
        Ok(())
    }

    #[test]
    fn later_carbon_replaces_earlier() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let write = |name: &str, stands: &[(f64, f64)]| -> anyhow::Result<PathBuf> {
            let mut series = CarbonSeries::default();
            for &(stand, v) in stands {
                series.insert(CarbonRecord {
                    stand,
                    years: BTreeMap::from([(0, vec![v])]),
                });
            }
            let path = dir.path().join(name);
            series.write_json(&path)?;
            Ok(path)
        };
        let first = write("first.json", &[(1.0, 1.0), (2.0, 2.0)])?;
        let second = write("second.json", &[(1.0, 9.0), (3.0, 3.0)])?;

        let merged = merge_carbon(&[first, second], &dir.path().join("carbon.json"))?;
        let stands: Vec<f64> = merged.records().iter().map(|r| r.stand).collect();
        assert_eq!(stands, [1.0, 2.0, 3.0]);
        assert_eq!(merged.record(1.0).unwrap().years[&0], vec![9.0]);
        Ok(())
    }
}
