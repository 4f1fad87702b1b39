//! Batch driver: encode | decode | roundtrip over many JSON documents.
use std::path::{Path, PathBuf};
use std::process::ExitCode;

use anyhow::{anyhow, bail, Context, Result};
use clap::{Args, Parser, Subcommand};
use colored::Colorize;
use rayon::prelude::*;
use serde_json::Value;

use crate::config::CodecOptions;
use crate::decode::Decoder;
use crate::encode::Encoder;
use crate::live::ResourceTree;
use crate::schema::SchemaModel;
use crate::value::EncodedRecord;

// ————————————————————————————————————————————————————————————————————————————
// TYPES
// ————————————————————————————————————————————————————————————————————————————

/// convert FHIR JSON resources to and from Avro-shaped records, driven by an .avsc schema
#[derive(Parser, Debug)]
#[command(name = "fhir-avro", version)]
pub struct CommandLineInterface {
    #[command(subcommand)]
    cmd: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// encode FHIR JSON resources into records (NDJSON out)
    Encode(EncodeCmd),
    /// decode JSON-rendered records back into FHIR JSON resources (NDJSON out)
    Decode(DecodeCmd),
    /// encode then decode every resource and report whether it came back unchanged
    Roundtrip(RoundtripCmd),
}

#[derive(Args, Debug, Clone)]
struct InputSettings {
    /// treat input as newline-delimited JSON (NDJSON)
    #[arg(long, default_value_t = false)]
    ndjson: bool,

    /// JSON Pointer to select a subnode in each document (e.g. /entry/0/resource)
    #[arg(long)]
    json_pointer: Option<String>,

    /// JQ pre-process filter for each document; every output is a document
    /// of its own (e.g. '.entry[].resource' to unpack a Bundle)
    #[arg(long)]
    jq_expr: Option<String>,

    /// One or more inputs. May be literal paths or quoted glob patterns
    #[arg(long, short, num_args = 1.., required = true)]
    input: Vec<String>,
}

#[derive(Args, Debug, Clone)]
struct CodecSettings {
    /// the .avsc schema whose root record describes the resource
    #[arg(long, short)]
    schema: PathBuf,

    /// JSON file with codec options; the flags below override it
    #[arg(long)]
    config: Option<PathBuf>,

    /// do not infer dates and timestamps from the text of plain int/long values
    #[arg(long, default_value_t = false)]
    no_shape_sniffing: bool,

    /// record field holding the record's own type name
    #[arg(long)]
    discriminator: Option<String>,

    /// fail on resource properties the schema has no field for
    #[arg(long, default_value_t = false)]
    strict_properties: bool,
}

#[derive(clap::Parser, Debug)]
struct EncodeCmd {
    #[command(flatten)]
    input_settings: InputSettings,

    #[command(flatten)]
    codec_settings: CodecSettings,

    /// output .ndjson file (stdout if omitted)
    #[arg(short, long)]
    out: Option<PathBuf>,
}

#[derive(clap::Parser, Debug)]
struct DecodeCmd {
    #[command(flatten)]
    input_settings: InputSettings,

    #[command(flatten)]
    codec_settings: CodecSettings,

    /// output .ndjson file (stdout if omitted)
    #[arg(short, long)]
    out: Option<PathBuf>,
}

#[derive(clap::Parser, Debug)]
struct RoundtripCmd {
    #[command(flatten)]
    input_settings: InputSettings,

    #[command(flatten)]
    codec_settings: CodecSettings,

    /// only print failures
    #[arg(long, short, default_value_t = false)]
    quiet: bool,
}

/// One input document and where it came from.
#[derive(Debug, Clone)]
struct Document {
    origin: String,
    value: Value,
}

// ————————————————————————————————————————————————————————————————————————————
// IMPLEMENTATION
// ————————————————————————————————————————————————————————————————————————————

impl InputSettings {
    fn load_documents(&self) -> Result<Vec<Document>> {
        let source_paths = resolve_file_path_patterns(&self.input)
            .map_err(|error| anyhow!("failed to resolve input file paths: {error}"))?;
        let mut documents = Vec::new();
        for source_path in source_paths {
            let source_path_str = source_path.to_string_lossy().to_string();
            let source = std::fs::read_to_string(&source_path)
                .with_context(|| format!("failed to read source file {source_path_str}"))?;
            let values = if self.ndjson {
                source
                    .lines()
                    .enumerate()
                    .filter(|(_, line)| !line.trim().is_empty())
                    .map(|(ix, line)| {
                        serde_json::from_str::<Value>(line)
                            .with_context(|| format!("failed to parse JSON ({source_path_str}:{})", ix + 1))
                    })
                    .collect::<Result<Vec<_>>>()?
            } else {
                vec![serde_json::from_str::<Value>(&source)
                    .with_context(|| format!("failed to parse JSON source file ({source_path_str})"))?]
            };
            for (ix, value) in values.into_iter().enumerate() {
                for (jx, value) in self.select(value, &source_path_str)?.into_iter().enumerate() {
                    documents.push(Document {
                        origin: format!("{source_path_str}#{ix}.{jx}"),
                        value,
                    });
                }
            }
        }
        tracing::debug!(count = documents.len(), "documents loaded");
        Ok(documents)
    }

    fn select(&self, value: Value, source_path_str: &str) -> Result<Vec<Value>> {
        let value = match self.json_pointer.as_deref() {
            None => value,
            Some(pointer) => value
                .pointer(pointer)
                .cloned()
                .ok_or_else(|| anyhow!("JSON pointer {pointer} selects nothing in {source_path_str}"))?,
        };
        match self.jq_expr.as_ref() {
            None => Ok(vec![value]),
            Some(jq_expr) => crate::jq_exec::select_documents(jq_expr, &value)
                .with_context(|| format!("failed to apply jq expression to source file ({source_path_str})")),
        }
    }
}

impl CodecSettings {
    fn load_schema(&self) -> Result<SchemaModel> {
        SchemaModel::from_avsc_path(&self.schema)
            .with_context(|| format!("failed to load schema {}", self.schema.display()))
    }

    fn options(&self) -> Result<CodecOptions> {
        let mut options = match self.config.as_ref() {
            Some(path) => CodecOptions::from_json_file(path)?,
            None => CodecOptions::default(),
        };
        if self.no_shape_sniffing {
            options.shape_sniffing = false;
        }
        if let Some(discriminator) = self.discriminator.as_ref() {
            options.discriminator = discriminator.clone();
        }
        if self.strict_properties {
            options.strict_properties = true;
        }
        Ok(options)
    }
}

impl CommandLineInterface {
    pub fn load() -> Self {
        Self::parse()
    }

    pub fn run(&self) -> Result<ExitCode> {
        match &self.cmd {
            Command::Encode(target) => {
                let model = target.codec_settings.load_schema()?;
                let options = target.codec_settings.options()?;
                let documents = target.input_settings.load_documents()?;
                let encoder = Encoder::new(&model, &options);
                let lines = documents
                    .par_iter()
                    .map(|doc| {
                        encode_document(&encoder, &doc.value)
                            .and_then(|record| Ok(record.to_json()?.to_string()))
                            .with_context(|| format!("failed to encode {}", doc.origin))
                    })
                    .collect::<Result<Vec<_>>>()?;
                write_lines(target.out.as_deref(), &lines)?;
                Ok(ExitCode::SUCCESS)
            }
            Command::Decode(target) => {
                let model = target.codec_settings.load_schema()?;
                let options = target.codec_settings.options()?;
                let documents = target.input_settings.load_documents()?;
                let decoder = Decoder::new(&model, &options);
                let lines = documents
                    .par_iter()
                    .map(|doc| {
                        decode_document(&model, &decoder, &doc.value)
                            .and_then(|tree| Ok(tree.to_json()?.to_string()))
                            .with_context(|| format!("failed to decode {}", doc.origin))
                    })
                    .collect::<Result<Vec<_>>>()?;
                write_lines(target.out.as_deref(), &lines)?;
                Ok(ExitCode::SUCCESS)
            }
            Command::Roundtrip(target) => {
                let model = target.codec_settings.load_schema()?;
                let options = target.codec_settings.options()?;
                let documents = target.input_settings.load_documents()?;
                let encoder = Encoder::new(&model, &options);
                let decoder = Decoder::new(&model, &options);
                let outcomes = documents
                    .par_iter()
                    .map(|doc| roundtrip_document(&model, &encoder, &decoder, &doc.value))
                    .collect::<Vec<_>>();

                let mut failed = 0usize;
                for (doc, outcome) in documents.iter().zip(outcomes) {
                    match outcome {
                        Ok(()) => {
                            if !target.quiet {
                                println!("{} {}", "✓".green(), doc.origin);
                            }
                        }
                        Err(error) => {
                            failed += 1;
                            println!("{} {}: {error:#}", "✗".red(), doc.origin);
                        }
                    }
                }
                let summary = format!("{} of {} documents round-tripped", documents.len() - failed, documents.len());
                if failed == 0 {
                    println!("{}", summary.green().bold());
                    Ok(ExitCode::SUCCESS)
                } else {
                    println!("{}", summary.red().bold());
                    Ok(ExitCode::FAILURE)
                }
            }
        }
    }
}

// ————————————————————————————————————————————————————————————————————————————
// INTERNAL HELPERS
// ————————————————————————————————————————————————————————————————————————————

fn encode_document(encoder: &Encoder<'_>, json: &Value) -> Result<EncodedRecord> {
    let tree = ResourceTree::from_json(json)?;
    Ok(encoder.encode_resource(tree.root_ref())?)
}

fn decode_document(model: &SchemaModel, decoder: &Decoder<'_>, json: &Value) -> Result<ResourceTree> {
    let record = EncodedRecord::from_json(model, json)?;
    Ok(decoder.decode_resource(&record)?)
}

/// Encode, render to JSON, read back, decode, and compare with the input.
fn roundtrip_document(model: &SchemaModel, encoder: &Encoder<'_>, decoder: &Decoder<'_>, json: &Value) -> Result<()> {
    let encoded = encode_document(encoder, json).context("encode")?.to_json().context("encode")?;
    let decoded = decode_document(model, decoder, &encoded).context("decode")?.to_json().context("decode")?;
    match first_difference(json, &decoded, String::new()) {
        None => Ok(()),
        Some(pointer) if pointer.is_empty() => bail!("changed at the root"),
        Some(pointer) => bail!("changed at {pointer}"),
    }
}

/// JSON pointer of the first place where `a` and `b` differ.
fn first_difference(a: &Value, b: &Value, at: String) -> Option<String> {
    match (a, b) {
        (Value::Object(x), Value::Object(y)) => {
            for key in x.keys().chain(y.keys()) {
                let pointer = format!("{at}/{key}");
                match (x.get(key), y.get(key)) {
                    (Some(u), Some(v)) => {
                        if let Some(found) = first_difference(u, v, pointer) {
                            return Some(found);
                        }
                    }
                    _ => return Some(pointer),
                }
            }
            None
        }
        (Value::Array(x), Value::Array(y)) => {
            if x.len() != y.len() {
                return Some(at);
            }
            x.iter()
                .zip(y)
                .enumerate()
                .find_map(|(ix, (u, v))| first_difference(u, v, format!("{at}/{ix}")))
        }
        (x, y) if x == y => None,
        _ => Some(at),
    }
}

fn write_lines(out: Option<&Path>, lines: &[String]) -> Result<()> {
    let mut text = lines.join("\n");
    text.push('\n');
    match out {
        Some(out) => {
            if let Some(parent) = out.parent() {
                std::fs::create_dir_all(parent)?;
            }
            std::fs::write(out, text).with_context(|| format!("failed to write {}", out.display()))
        }
        None => {
            print!("{text}");
            Ok(())
        }
    }
}

fn resolve_file_path_patterns<I>(patterns: I) -> Result<Vec<PathBuf>, Box<dyn std::error::Error + Send + Sync>>
where
    I: IntoIterator,
    I::Item: AsRef<str>,
{
    fn has_glob_chars(s: &str) -> bool {
        s.bytes().any(|b| matches!(b, b'*' | b'?' | b'[' | b'{'))
    }

    let mut out = Vec::<PathBuf>::new();

    for raw in patterns {
        let pattern = raw.as_ref();

        if has_glob_chars(pattern) {
            let mut matched_any = false;
            for entry in glob::glob(pattern)? {
                out.push(entry?);
                matched_any = true;
            }
            if !matched_any {
                // an explicit glob that matches nothing is almost always a typo
                return Err(format!("glob pattern matched no files: {pattern}").into());
            }
        } else {
            out.push(PathBuf::from(pattern));
        }
    }

    Ok(out)
}
