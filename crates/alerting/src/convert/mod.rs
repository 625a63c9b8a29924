//! Frame-to-series conversion.
//!
//! Turns a columnar [`Frame`] into named [`Series`]:
//! - **wide** frames (one time field + numeric fields) yield one series per
//!   numeric field, in field order;
//! - **long** frames (with string "factor" fields) are pivoted so each
//!   distinct factor combination becomes its own series per numeric field;
//!   with zero rows there are no combinations, so each numeric field yields
//!   one empty series as in the wide case;
//! - frames with no fields, or only a time field, yield a single empty series
//!   named after the frame so the condition reports no data.
//!
//! Series naming, highest precedence first: the field's display name, the
//! datasource display name, then `field {k1=v1, k2=v2}` (braces omitted for
//! an empty label set).

use indexmap::IndexMap;

use vigil_core::{labels_to_string, Field, Frame, Series, Tags, TimePoint};

use crate::error::{AlertError, Result};


/// Shape of a frame as seen by the converter.
#[derive(Debug, PartialEq)]
enum FrameShape {
    NotTimeSeries,
    Wide {
        time: usize,
        values: Vec<usize>,
    },
    Long {
        time: usize,
        values: Vec<usize>,
        factors: Vec<usize>,
    },
}

fn frame_shape(frame: &Frame) -> FrameShape {
    let mut time = None;
    let mut values = Vec::new();
    let mut factors = Vec::new();

    for (i, field) in frame.fields.iter().enumerate() {
        if field.is_time() {
            // Only the first time field is the time index.
            time.get_or_insert(i);
        } else if field.is_numeric() {
            values.push(i);
        } else if field.is_string() {
            factors.push(i);
        }
    }

    match time {
        Some(time) if !values.is_empty() => {
            if factors.is_empty() {
                FrameShape::Wide { time, values }
            } else {
                FrameShape::Long {
                    time,
                    values,
                    factors,
                }
            }
        }
        _ => FrameShape::NotTimeSeries,
    }
}

/// Convert one frame into series.
pub fn frame_to_series(frame: &Frame) -> Result<Vec<Series>> {
    match frame_shape(frame) {
        FrameShape::NotTimeSeries => {
            let only_time = frame.fields.len() == 1 && frame.fields[0].is_time();
            if frame.fields.is_empty() || only_time {
                Ok(vec![Series::new(frame.name.clone(), Vec::new())])
            } else {
                Err(AlertError::Conversion(format!(
                    "input frame '{}' is not recognized as a time series",
                    frame.name
                )))
            }
        }
        FrameShape::Wide { time, values } => wide_to_series(frame, time, &values),
        FrameShape::Long {
            time,
            values,
            factors,
        } => long_to_series(frame, time, &values, &factors),
    }
}

/// Convert every frame of a result, concatenating the series.
pub fn frames_to_series(frames: &[Frame]) -> Result<Vec<Series>> {
    let mut out = Vec::new();
    for frame in frames {
        let series = frame_to_series(frame).map_err(|e| {
            AlertError::Conversion(format!("failed to convert frame '{}': {}", frame.name, e))
        })?;
        out.extend(series);
    }
    Ok(out)
}

fn series_name(field: &Field, labels: &Tags) -> String {
    if let Some(name) = field.display_name_override() {
        return name.to_string();
    }
    if labels.is_empty() {
        field.name.clone()
    } else {
        format!("{} {{{}}}", field.name, labels_to_string(labels))
    }
}

fn timestamps(field: &Field) -> Result<Vec<f64>> {
    (0..field.len())
        .map(|row| {
            field.float_at(row)?.ok_or_else(|| {
                AlertError::Conversion(format!("null timestamp at row {} of '{}'", row, field.name))
            })
        })
        .collect()
}

/// Non-increasing with at least one strict decrease.
fn is_descending(ts: &[f64]) -> bool {
    ts.len() > 1 && ts.windows(2).all(|w| w[0] >= w[1]) && ts[0] > ts[ts.len() - 1]
}

fn wide_to_series(frame: &Frame, time_idx: usize, value_idx: &[usize]) -> Result<Vec<Series>> {
    let ts = timestamps(&frame.fields[time_idx])?;
    let reverse = is_descending(&ts);

    let mut out = Vec::with_capacity(value_idx.len());
    for &idx in value_idx {
        let field = &frame.fields[idx];
        if field.len() != ts.len() {
            return Err(AlertError::Conversion(format!(
                "field '{}' has {} rows, time field has {}",
                field.name,
                field.len(),
                ts.len()
            )));
        }

        let mut points = Vec::with_capacity(ts.len());
        for (row, &t) in ts.iter().enumerate() {
            points.push(TimePoint::new(field.float_at(row)?, t));
        }
        if reverse {
            points.reverse();
        }

        out.push(Series {
            name: series_name(field, &field.labels),
            tags: field.labels.clone(),
            points,
        });
    }
    Ok(out)
}

fn long_to_series(
    frame: &Frame,
    time_idx: usize,
    value_idx: &[usize],
    factor_idx: &[usize],
) -> Result<Vec<Series>> {
    let ts = timestamps(&frame.fields[time_idx])?;
    let rows = ts.len();
    if let Some(short) = frame.fields.iter().find(|f| f.len() != rows) {
        return Err(AlertError::Conversion(format!(
            "field '{}' has {} rows, time field has {}",
            short.name,
            short.len(),
            rows
        )));
    }

    // No rows means no factor values: keep one empty series per value field.
    if rows == 0 {
        return Ok(value_idx
            .iter()
            .map(|&idx| {
                let field = &frame.fields[idx];
                Series {
                    name: series_name(field, &field.labels),
                    tags: field.labels.clone(),
                    points: Vec::new(),
                }
            })
            .collect());
    }

    // Distinct timestamps and factor combinations, in first-appearance order.
    let mut times: IndexMap<u64, f64> = IndexMap::new();
    let mut combos: IndexMap<Vec<String>, ()> = IndexMap::new();
    let mut row_slots = Vec::with_capacity(rows);

    for (row, &t) in ts.iter().enumerate() {
        let (time_slot, _) = times.insert_full(t.to_bits(), t);
        let key: Vec<String> = factor_idx
            .iter()
            .map(|&i| frame.fields[i].string_at(row).unwrap_or_default().to_string())
            .collect();
        let (combo_slot, _) = combos.insert_full(key, ());
        row_slots.push((time_slot, combo_slot));
    }

    let time_values: Vec<f64> = times.values().copied().collect();
    let reverse = is_descending(&time_values);

    let mut out = Vec::with_capacity(value_idx.len() * combos.len());
    for &idx in value_idx {
        let field = &frame.fields[idx];

        let mut grid: Vec<Vec<Option<f64>>> = vec![vec![None; time_values.len()]; combos.len()];
        for (row, &(time_slot, combo_slot)) in row_slots.iter().enumerate() {
            grid[combo_slot][time_slot] = field.float_at(row)?;
        }

        for (combo, cells) in combos.keys().zip(grid) {
            let mut labels = field.labels.clone();
            for (&fi, value) in factor_idx.iter().zip(combo) {
                labels.insert(frame.fields[fi].name.clone(), value.clone());
            }

            let mut points: Vec<TimePoint> = cells
                .into_iter()
                .zip(&time_values)
                .map(|(v, &t)| TimePoint::new(v, t))
                .collect();
            if reverse {
                points.reverse();
            }

            out.push(Series {
                name: series_name(field, &labels),
                tags: labels,
                points,
            });
        }
    }
    Ok(out)
}
