use arrow::array::{
    Array, ArrayRef, Date32Array, Decimal128Array, RecordBatch, StringArray,
    TimestampMicrosecondArray, UInt64Array,
};
use arrow::datatypes::{DataType, Field, Schema, TimeUnit};
use async_trait::async_trait;
use chrono::{DateTime, Days, NaiveDate};
use marketdata_application::ports::{BarRepository, RepositoryError};
use marketdata_domain::{DateRange, MarketBar};
use parquet::arrow::arrow_reader::ParquetRecordBatchReaderBuilder;
use parquet::arrow::ArrowWriter;
use parquet::file::properties::WriterProperties;
use rust_decimal::Decimal;
use shaku::Component;
use std::collections::BTreeMap;
use std::fs::{self, File};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, warn};

const PRICE_PRECISION: u8 = 18;
const PRICE_SCALE: i8 = 4;

/// Analytical store backed by one parquet file per `(symbol, date)`:
/// `data_dir/SYMBOL/YYYY-MM-DD.parquet`. Rewriting a key's file is the
/// idempotent upsert; the filesystem path doubles as the dedup index.
#[derive(Component)]
#[shaku(interface = BarRepository)]
pub struct ParquetBarRepository {
    data_dir: PathBuf,
}

impl ParquetBarRepository {
    pub fn new(data_dir: PathBuf) -> Self {
        Self { data_dir }
    }

    fn create_schema() -> Arc<Schema> {
        Arc::new(Schema::new(vec![
            Field::new(
                "timestamp",
                DataType::Timestamp(TimeUnit::Microsecond, Some("UTC".into())),
                false,
            ),
            Field::new("symbol", DataType::Utf8, false),
            Field::new("date", DataType::Date32, false),
            Field::new("open", decimal_type(), false),
            Field::new("high", decimal_type(), false),
            Field::new("low", decimal_type(), false),
            Field::new("close", decimal_type(), false),
            Field::new("volume", DataType::UInt64, false),
            Field::new("adjusted_close", decimal_type(), true),
            Field::new(
                "ingested_at",
                DataType::Timestamp(TimeUnit::Microsecond, Some("UTC".into())),
                false,
            ),
        ]))
    }

    fn file_path(&self, symbol: &str, date: NaiveDate) -> PathBuf {
        self.data_dir.join(symbol).join(format!("{}.parquet", date))
    }

    fn write_partition(
        &self,
        symbol: &str,
        date: NaiveDate,
        bars: Vec<MarketBar>,
    ) -> Result<usize, RepositoryError> {
        // Per-record prepare step: a row that cannot be represented is
        // dropped and logged, the rest of the partition goes through.
        let mut rows = Vec::with_capacity(bars.len());
        for bar in &bars {
            match BarRow::try_from(bar) {
                Ok(row) => rows.push(row),
                Err(e) => warn!("Dropping unstorable record {} {}: {}", symbol, date, e),
            }
        }
        if rows.is_empty() {
            return Ok(0);
        }

        let dir = self.data_dir.join(symbol);
        fs::create_dir_all(&dir).map_err(unavailable)?;
        let path = self.file_path(symbol, date);

        match write_file(&path, &rows) {
            Ok(count) => {
                info!("Wrote {} rows to {}", count, path.display());
                Ok(count)
            }
            Err(e @ RepositoryError::Unavailable(_)) => Err(e),
            Err(e) => {
                warn!("Skipping partition {} {}: {}", symbol, date, e);
                Ok(0)
            }
        }
    }

    fn read_file(&self, path: &PathBuf) -> Result<Vec<MarketBar>, RepositoryError> {
        let file = File::open(path).map_err(unavailable)?;
        let reader = ParquetRecordBatchReaderBuilder::try_new(file)
            .map_err(serialization)?
            .build()
            .map_err(serialization)?;

        let mut bars = Vec::new();
        for batch in reader {
            let batch = batch.map_err(serialization)?;
            decode_batch(&batch, &mut bars)?;
        }
        Ok(bars)
    }
}

#[async_trait]
impl BarRepository for ParquetBarRepository {
    async fn write_batch(&self, bars: Vec<MarketBar>) -> Result<usize, RepositoryError> {
        if bars.is_empty() {
            return Ok(0);
        }

        // Group on the dedup key; fetch order is preserved inside each
        // partition.
        let mut partitions: BTreeMap<(String, NaiveDate), Vec<MarketBar>> = BTreeMap::new();
        for bar in bars {
            partitions
                .entry((bar.symbol().to_string(), bar.date()))
                .or_default()
                .push(bar);
        }

        let mut written = 0;
        for ((symbol, date), group) in partitions {
            written += self.write_partition(&symbol, date, group)?;
        }
        Ok(written)
    }

    async fn exists(&self, symbol: &str, date: NaiveDate) -> Result<bool, RepositoryError> {
        Ok(self.file_path(symbol, date).exists())
    }

    async fn query_range(
        &self,
        symbol: &str,
        range: DateRange,
    ) -> Result<Vec<MarketBar>, RepositoryError> {
        let mut bars = Vec::new();
        for date in range.dates() {
            let path = self.file_path(symbol, date);
            if !path.exists() {
                continue;
            }
            bars.extend(self.read_file(&path)?);
        }
        Ok(bars)
    }
}

fn decimal_type() -> DataType {
    DataType::Decimal128(PRICE_PRECISION, PRICE_SCALE)
}

fn unavailable(e: std::io::Error) -> RepositoryError {
    RepositoryError::Unavailable(e.to_string())
}

fn serialization<E: std::fmt::Display>(e: E) -> RepositoryError {
    RepositoryError::Serialization(e.to_string())
}

/// One bar scaled into arrow-native values.
struct BarRow {
    timestamp_us: i64,
    symbol: String,
    date_days: i32,
    open: i128,
    high: i128,
    low: i128,
    close: i128,
    volume: u64,
    adjusted_close: Option<i128>,
    ingested_us: i64,
}

impl TryFrom<&MarketBar> for BarRow {
    type Error = RepositoryError;

    fn try_from(bar: &MarketBar) -> Result<Self, Self::Error> {
        Ok(Self {
            timestamp_us: bar.timestamp().timestamp_micros(),
            symbol: bar.symbol().to_string(),
            date_days: days_since_epoch(bar.date()),
            open: scaled_mantissa(bar.open())?,
            high: scaled_mantissa(bar.high())?,
            low: scaled_mantissa(bar.low())?,
            close: scaled_mantissa(bar.close())?,
            volume: bar.volume(),
            adjusted_close: bar.adjusted_close().map(scaled_mantissa).transpose()?,
            ingested_us: bar.ingested_at().timestamp_micros(),
        })
    }
}

fn scaled_mantissa(value: Decimal) -> Result<i128, RepositoryError> {
    let mut scaled = value;
    scaled.rescale(PRICE_SCALE as u32);
    if scaled.scale() != PRICE_SCALE as u32 {
        return Err(RepositoryError::Serialization(format!(
            "Value {} cannot be scaled to {} decimal places",
            value, PRICE_SCALE
        )));
    }
    let mantissa = scaled.mantissa();
    if mantissa.unsigned_abs() >= 10u128.pow(u32::from(PRICE_PRECISION)) {
        return Err(RepositoryError::Serialization(format!(
            "Value {} exceeds Decimal128({}, {})",
            value, PRICE_PRECISION, PRICE_SCALE
        )));
    }
    Ok(mantissa)
}

fn days_since_epoch(date: NaiveDate) -> i32 {
    let epoch = NaiveDate::from_ymd_opt(1970, 1, 1).expect("epoch is valid");
    (date - epoch).num_days() as i32
}

fn date_from_epoch_days(days: i32) -> Option<NaiveDate> {
    let epoch = NaiveDate::from_ymd_opt(1970, 1, 1).expect("epoch is valid");
    if days >= 0 {
        epoch.checked_add_days(Days::new(days as u64))
    } else {
        epoch.checked_sub_days(Days::new(days.unsigned_abs() as u64))
    }
}

fn write_file(path: &PathBuf, rows: &[BarRow]) -> Result<usize, RepositoryError> {
    let schema = ParquetBarRepository::create_schema();

    let decimal_array = |values: Vec<i128>| -> Result<ArrayRef, RepositoryError> {
        Ok(Arc::new(
            Decimal128Array::from(values)
                .with_precision_and_scale(PRICE_PRECISION, PRICE_SCALE)
                .map_err(serialization)?,
        ))
    };

    let timestamps: Vec<i64> = rows.iter().map(|r| r.timestamp_us).collect();
    let symbols: Vec<&str> = rows.iter().map(|r| r.symbol.as_str()).collect();
    let dates: Vec<i32> = rows.iter().map(|r| r.date_days).collect();
    let volumes: Vec<u64> = rows.iter().map(|r| r.volume).collect();
    let adjusted: Vec<Option<i128>> = rows.iter().map(|r| r.adjusted_close).collect();
    let ingested: Vec<i64> = rows.iter().map(|r| r.ingested_us).collect();

    let arrays: Vec<ArrayRef> = vec![
        Arc::new(TimestampMicrosecondArray::from(timestamps).with_timezone("UTC")),
        Arc::new(StringArray::from(symbols)),
        Arc::new(Date32Array::from(dates)),
        decimal_array(rows.iter().map(|r| r.open).collect())?,
        decimal_array(rows.iter().map(|r| r.high).collect())?,
        decimal_array(rows.iter().map(|r| r.low).collect())?,
        decimal_array(rows.iter().map(|r| r.close).collect())?,
        Arc::new(UInt64Array::from(volumes)),
        Arc::new(
            Decimal128Array::from(adjusted)
                .with_precision_and_scale(PRICE_PRECISION, PRICE_SCALE)
                .map_err(serialization)?,
        ),
        Arc::new(TimestampMicrosecondArray::from(ingested).with_timezone("UTC")),
    ];

    let batch = RecordBatch::try_new(schema.clone(), arrays).map_err(serialization)?;

    let file = File::create(path).map_err(unavailable)?;
    let props = WriterProperties::builder().build();
    let mut writer = ArrowWriter::try_new(file, schema, Some(props)).map_err(serialization)?;
    writer.write(&batch).map_err(serialization)?;
    writer.close().map_err(serialization)?;

    Ok(rows.len())
}

fn decode_batch(batch: &RecordBatch, bars: &mut Vec<MarketBar>) -> Result<(), RepositoryError> {
    let timestamps = column::<TimestampMicrosecondArray>(batch, 0)?;
    let symbols = column::<StringArray>(batch, 1)?;
    let dates = column::<Date32Array>(batch, 2)?;
    let opens = column::<Decimal128Array>(batch, 3)?;
    let highs = column::<Decimal128Array>(batch, 4)?;
    let lows = column::<Decimal128Array>(batch, 5)?;
    let closes = column::<Decimal128Array>(batch, 6)?;
    let volumes = column::<UInt64Array>(batch, 7)?;
    let adjusted = column::<Decimal128Array>(batch, 8)?;
    let ingested = column::<TimestampMicrosecondArray>(batch, 9)?;

    for i in 0..batch.num_rows() {
        let timestamp = DateTime::from_timestamp_micros(timestamps.value(i))
            .ok_or_else(|| serialization("timestamp out of range"))?;
        let ingested_at = DateTime::from_timestamp_micros(ingested.value(i))
            .ok_or_else(|| serialization("ingested_at out of range"))?;
        let date = date_from_epoch_days(dates.value(i))
            .ok_or_else(|| serialization("date out of range"))?;
        let adjusted_close = if adjusted.is_null(i) {
            None
        } else {
            Some(price(adjusted.value(i)))
        };

        let bar = MarketBar::from_parts(
            symbols.value(i),
            timestamp,
            date,
            price(opens.value(i)),
            price(highs.value(i)),
            price(lows.value(i)),
            price(closes.value(i)),
            volumes.value(i),
            adjusted_close,
            ingested_at,
        )
        .map_err(serialization)?;
        bars.push(bar);
    }

    Ok(())
}

fn price(mantissa: i128) -> Decimal {
    Decimal::from_i128_with_scale(mantissa, PRICE_SCALE as u32)
}

fn column<'a, T: 'static>(batch: &'a RecordBatch, index: usize) -> Result<&'a T, RepositoryError> {
    batch
        .column(index)
        .as_any()
        .downcast_ref::<T>()
        .ok_or_else(|| serialization(format!("Unexpected column type at index {}", index)))
}
