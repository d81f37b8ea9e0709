use std::io::{self, prelude::*};

use crossbeam_channel::{Receiver, SendError, Sender};
use itertools::Itertools;
use tracing::{debug, instrument};

use mzquant::grouper::{ArrayCell, PeptideArrayRow};
use mzquant::PeptideArraySink;

/// The rows of a peptide array on their way to the writer thread
#[derive(Debug)]
pub enum ArrayMessage {
    Header(Vec<String>),
    Row(PeptideArrayRow),
}

/// A [`PeptideArraySink`] that forwards everything over a channel
#[derive(Debug, Clone)]
pub struct ChannelSink {
    sender: Sender<ArrayMessage>,
}

impl ChannelSink {
    pub fn new(sender: Sender<ArrayMessage>) -> Self {
        Self { sender }
    }
}

impl PeptideArraySink for ChannelSink {
    type Error = SendError<ArrayMessage>;

    fn write_header(&mut self, set_names: &[String]) -> Result<(), Self::Error> {
        self.sender.send(ArrayMessage::Header(set_names.to_vec()))
    }

    fn write_row(&mut self, row: PeptideArrayRow) -> Result<(), Self::Error> {
        self.sender.send(ArrayMessage::Row(row))
    }
}

/// Marks a peptide or protein field whose cell folded in more than one distinct identifier
pub const MULTIPLE_TAG: &str = "multiple";

fn identifier_field(values: &[String], multiple: bool) -> String {
    let joined = values.iter().join(";");
    match (multiple, joined.is_empty()) {
        (false, _) => joined,
        (true, true) => MULTIPLE_TAG.to_string(),
        (true, false) => format!("{MULTIPLE_TAG}({joined})"),
    }
}

/// Formats a peptide array as tab-separated text, one row per aligned bucket
/// with an intensity column for every run
pub struct PeptideArrayWriter<W: Write> {
    handle: csv::Writer<W>,
    by_charge: bool,
    identifications: bool,
}

impl<W: Write> PeptideArrayWriter<W> {
    pub fn new(handle: W, by_charge: bool, identifications: bool) -> Self {
        let handle = csv::WriterBuilder::new()
            .delimiter(b'\t')
            .has_headers(false)
            .from_writer(handle);
        Self {
            handle,
            by_charge,
            identifications,
        }
    }

    pub fn into_inner(self) -> io::Result<W> {
        self.handle.into_inner().map_err(|e| e.into_error())
    }

    pub fn write_header(&mut self, set_names: &[String]) -> io::Result<()> {
        let mut columns = vec!["id".to_string()];
        if self.by_charge {
            columns.push("charge".into());
        }
        columns.extend(
            [
                "minMass",
                "maxMass",
                "minElution",
                "maxElution",
                "featureCount",
                "setCount",
            ]
            .map(String::from),
        );
        for name in set_names {
            columns.push(format!("intensity_{name}"));
            if self.identifications {
                columns.push(format!("peptide_{name}"));
                columns.push(format!("protein_{name}"));
            }
        }
        self.handle.write_record(&columns)?;
        Ok(())
    }

    fn push_cell(&self, record: &mut Vec<String>, cell: Option<&ArrayCell>) {
        match cell {
            Some(cell) => {
                record.push(cell.intensity.to_string());
                if self.identifications {
                    record.push(identifier_field(&cell.peptides, cell.multiple_peptides));
                    record.push(identifier_field(&cell.proteins, cell.multiple_proteins));
                }
            }
            None => {
                record.push(String::new());
                if self.identifications {
                    record.extend([String::new(), String::new()]);
                }
            }
        }
    }

    pub fn write_row(&mut self, row: &PeptideArrayRow) -> io::Result<()> {
        let mut record = vec![row.id.to_string()];
        if self.by_charge {
            record.push(row.charge.map(|z| z.to_string()).unwrap_or_default());
        }
        record.extend([
            row.min_mass.to_string(),
            row.max_mass.to_string(),
            row.min_elution.to_string(),
            row.max_elution.to_string(),
            row.feature_count.to_string(),
            row.set_count.to_string(),
        ]);
        for cell in row.cells.iter() {
            self.push_cell(&mut record, cell.as_ref());
        }
        self.handle.write_record(&record)?;
        Ok(())
    }
}

/// Drain `receiver` into `writer` until every sender is gone, returning the number
/// of rows written
#[instrument(level = "debug", skip(writer, receiver))]
pub fn write_peptide_array<W: Write>(
    mut writer: PeptideArrayWriter<W>,
    receiver: Receiver<ArrayMessage>,
) -> io::Result<usize> {
    let mut rows = 0usize;
    while let Ok(message) = receiver.recv() {
        match message {
            ArrayMessage::Header(set_names) => writer.write_header(&set_names)?,
            ArrayMessage::Row(row) => {
                rows += 1;
                if rows % 10000 == 0 {
                    let queue_size = receiver.len();
                    tracing::info!("Completed Row {rows} | {queue_size} rows in the write queue");
                }
                writer.write_row(&row)?;
            }
        }
    }
    writer.handle.flush()?;
    debug!("Peptide array writer done after {rows} rows");
    Ok(rows)
}

#[cfg(test)]
mod test {
    use std::thread;

    use mzquant::{Feature, FeatureGrouper, FeatureSet, GroupingParams};

    use super::*;

    #[test_log::test]
    fn test_stream_rows() {
        let mut grouper = FeatureGrouper::new(GroupingParams::default());
        grouper.add_set(
            FeatureSet::new(vec![
                Feature::from_mass(1, 100.0, 1000.0, 50.0, 2),
                Feature::from_mass(2, 500.0, 2000.0, 70.0, 2),
            ])
            .with_source("a"),
        );
        grouper.add_set(FeatureSet::new(vec![Feature::from_mass(1, 110.0, 1000.02, 60.0, 2)]).with_source("b"));
        grouper.split2d().unwrap();

        let (sender, receiver) = crossbeam_channel::bounded(1);
        let task = thread::spawn(move || {
            write_peptide_array(PeptideArrayWriter::new(Vec::new(), false, false), receiver)
        });
        let mut sink = ChannelSink::new(sender);
        let diagnostics = grouper.write_peptide_array(&mut sink).unwrap();
        drop(sink);
        let rows = task.join().unwrap().unwrap();
        assert_eq!(rows, 2);
        assert_eq!(diagnostics.rows, 2);
    }

    #[test]
    fn test_format() {
        let mut writer = PeptideArrayWriter::new(Vec::new(), true, true);
        writer.write_header(&["a".to_string(), "b".to_string()]).unwrap();
        let row = PeptideArrayRow {
            id: 1,
            charge: Some(2),
            min_mass: 1000.0,
            max_mass: 1000.5,
            min_elution: 10.0,
            max_elution: 12.0,
            feature_count: 1,
            set_count: 1,
            cells: vec![
                Some(ArrayCell {
                    intensity: 25.0,
                    feature_count: 1,
                    representative: Feature::from_mass(1, 10.0, 1000.0, 25.0, 2),
                    peptides: vec!["PEPTIDE".into()],
                    proteins: vec!["P1".into(), "P2".into()],
                    multiple_peptides: false,
                    multiple_proteins: true,
                }),
                None,
            ],
        };
        writer.write_row(&row).unwrap();

        let conflicted = PeptideArrayRow {
            id: 2,
            charge: Some(3),
            feature_count: 3,
            set_count: 2,
            cells: vec![
                Some(ArrayCell {
                    intensity: 40.0,
                    feature_count: 2,
                    representative: Feature::from_mass(2, 11.0, 1000.1, 30.0, 3),
                    peptides: vec!["PEPTIDE".into(), "PEPTLDE".into()],
                    proteins: vec!["P1".into()],
                    multiple_peptides: true,
                    multiple_proteins: false,
                }),
                Some(ArrayCell {
                    intensity: 15.0,
                    feature_count: 1,
                    representative: Feature::from_mass(3, 11.5, 1000.2, 15.0, 3),
                    peptides: Vec::new(),
                    proteins: Vec::new(),
                    multiple_peptides: true,
                    multiple_proteins: true,
                }),
            ],
            ..row.clone()
        };
        writer.write_row(&conflicted).unwrap();

        let text = String::from_utf8(writer.into_inner().unwrap()).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(
            lines[0],
            "id\tcharge\tminMass\tmaxMass\tminElution\tmaxElution\tfeatureCount\tsetCount\tintensity_a\tpeptide_a\tprotein_a\tintensity_b\tpeptide_b\tprotein_b"
        );
        assert_eq!(
            lines[1],
            "1\t2\t1000\t1000.5\t10\t12\t1\t1\t25\tPEPTIDE\tmultiple(P1;P2)\t\t\t"
        );
        assert_eq!(
            lines[2],
            "2\t3\t1000\t1000.5\t10\t12\t3\t2\t40\tmultiple(PEPTIDE;PEPTLDE)\tP1\t15\tmultiple\tmultiple"
        );
        for line in &lines[1..] {
            assert_eq!(lines[0].split('\t').count(), line.split('\t').count());
        }
    }
}
