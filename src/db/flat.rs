use std::path::{Path, PathBuf};
use std::sync::Arc;

use csv_async::{AsyncReaderBuilder, AsyncWriter};
use futures::StreamExt;
use tokio::sync::Mutex;

use crate::{
    config::{DataConfig, UnitNames},
    error::{AppError, AppResult},
    models::{Attribute, AttributeList, AttributeType, Profile, Unit, UnitList, Value},
};

use super::{attach_nominals, match_filters, matches, ProviderAssoc};

const UNIT_EXTENSION: &str = "csv";
const HEADER_SEP: char = '~';

/// Store rooted at a directory holding one CSV file per unit.
///
/// The header row encodes each attribute as `name~type~key~autoinc`. File access is
/// serialized through a single mutex so rewrites never interleave with reads.
pub struct FlatAssoc {
    uri: String,
    root: PathBuf,
    units: UnitNames,
    io: Mutex<()>,
}

struct Table {
    attributes: Arc<AttributeList>,
    rows: Vec<Profile>,
}

/// Directory named by a flat store URI
pub fn store_root(uri: &str) -> PathBuf {
    let path = uri.strip_prefix("file://").or_else(|| uri.strip_prefix("file:")).unwrap_or(uri);
    PathBuf::from(path)
}

fn encode_header(attribute: &Attribute) -> String {
    format!(
        "{name}{sep}{kind}{sep}{key}{sep}{auto}",
        name = attribute.name,
        kind = attribute.kind,
        key = u8::from(attribute.key),
        auto = u8::from(attribute.auto_increment),
        sep = HEADER_SEP,
    )
}

fn decode_header(cell: &str) -> AppResult<Attribute> {
    let mut parts = cell.split(HEADER_SEP);
    let name = parts
        .next()
        .filter(|n| !n.trim().is_empty())
        .ok_or_else(|| AppError::Schema(format!("empty header cell '{}'", cell)))?;
    let kind = match parts.next() {
        Some(kind) => kind.parse::<AttributeType>().map_err(AppError::Schema)?,
        None => AttributeType::String,
    };
    let mut attribute = Attribute::new(name.trim(), kind);
    attribute.key = parts.next().map(|f| f.trim() == "1").unwrap_or(false);
    attribute.auto_increment = parts.next().map(|f| f.trim() == "1").unwrap_or(false);
    Ok(attribute)
}

fn encode_row(attributes: &AttributeList, profile: &Profile) -> Vec<String> {
    attributes
        .iter()
        .map(|a| {
            profile
                .get_by_name(&a.name)
                .map(Value::to_text)
                .unwrap_or_default()
        })
        .collect()
}

impl FlatAssoc {
    pub async fn open(config: &DataConfig) -> AppResult<Self> {
        let root = store_root(&config.store_uri);
        tokio::fs::create_dir_all(&root).await?;
        tracing::info!(root = %root.display(), "Opened flat-file store");
        Ok(Self {
            uri: config.store_uri.clone(),
            root,
            units: config.units.clone(),
            io: Mutex::new(()),
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn unit_path(&self, unit: &str) -> PathBuf {
        self.root.join(format!("{}.{}", unit, UNIT_EXTENSION))
    }

    async fn exists(&self, unit: &str) -> AppResult<bool> {
        Ok(tokio::fs::try_exists(self.unit_path(unit)).await?)
    }

    async fn read_table(&self, unit: &str) -> AppResult<Table> {
        let path = self.unit_path(unit);
        let file = match tokio::fs::File::open(&path).await {
            Ok(file) => file,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(AppError::Schema(format!("unknown unit '{}'", unit)));
            }
            Err(e) => return Err(e.into()),
        };

        let mut reader = AsyncReaderBuilder::new()
            .flexible(true)
            .create_reader(file);
        let headers = reader.headers().await?.clone();
        let attributes = Arc::new(AttributeList::new(
            headers
                .iter()
                .map(decode_header)
                .collect::<AppResult<Vec<_>>>()?,
        ));

        let mut rows = Vec::new();
        let mut records = reader.records();
        while let Some(record) = records.next().await {
            let record = record?;
            let mut profile = Profile::new(attributes.clone());
            for (i, cell) in record.iter().enumerate() {
                if let Some(attribute) = attributes.get(i) {
                    profile.set(i, Value::parse(attribute.kind, cell));
                }
            }
            rows.push(profile);
        }

        Ok(Table { attributes, rows })
    }

    /// Rewrites the unit through a temporary file
    async fn write_table(&self, unit: &str, attributes: &AttributeList, rows: &[Profile]) -> AppResult<()> {
        let path = self.unit_path(unit);
        let staging = path.with_extension(format!("{}.tmp", UNIT_EXTENSION));

        let file = tokio::fs::File::create(&staging).await?;
        let mut writer = AsyncWriter::from_writer(file);
        writer
            .write_record(attributes.iter().map(encode_header))
            .await?;
        for row in rows {
            writer.write_record(encode_row(attributes, row)).await?;
        }
        writer.flush().await?;
        drop(writer);

        tokio::fs::rename(&staging, &path).await?;
        Ok(())
    }

    async fn append_row(&self, unit: &str, attributes: &AttributeList, row: &Profile) -> AppResult<()> {
        let file = tokio::fs::OpenOptions::new()
            .append(true)
            .open(self.unit_path(unit))
            .await?;
        let mut writer = AsyncWriter::from_writer(file);
        writer.write_record(encode_row(attributes, row)).await?;
        writer.flush().await?;
        Ok(())
    }

    async fn try_get_unit_list(&self) -> AppResult<UnitList> {
        let mut units = Vec::new();
        let mut entries = tokio::fs::read_dir(&self.root).await?;
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some(UNIT_EXTENSION) {
                continue;
            }
            if let Some(name) = path.file_stem().and_then(|s| s.to_str()) {
                units.push(Unit::new(name, !self.units.contains(name)));
            }
        }
        units.sort();
        Ok(UnitList { units })
    }

    async fn try_create_unit(&self, unit: &str, attributes: &AttributeList) -> AppResult<bool> {
        if self.exists(unit).await? {
            tracing::warn!(unit = %unit, "Unit already exists");
            return Ok(false);
        }
        self.write_table(unit, attributes, &[]).await?;
        Ok(true)
    }

    async fn try_get_attributes(&self, unit: &str) -> AppResult<AttributeList> {
        let table = self.read_table(unit).await?;
        let mut attributes = (*table.attributes).clone();
        if unit != self.units.nominal && self.exists(&self.units.nominal).await? {
            let nominals = self.read_table(&self.units.nominal).await?;
            attach_nominals(&mut attributes, unit, &nominals.rows);
        }
        Ok(attributes)
    }

    async fn try_get_profiles(&self, unit: &str, condition: Option<&Profile>) -> AppResult<Vec<Profile>> {
        let table = self.read_table(unit).await?;
        let Some(condition) = condition else {
            return Ok(table.rows);
        };
        let filters = match_filters(&table.attributes, condition);
        Ok(table
            .rows
            .into_iter()
            .filter(|row| matches(row, &filters))
            .collect())
    }

    async fn try_insert_profile(&self, unit: &str, profile: &Profile) -> AppResult<()> {
        let table_attributes = self.read_header(unit).await?;
        self.append_row(unit, &table_attributes, profile).await
    }

    async fn read_header(&self, unit: &str) -> AppResult<AttributeList> {
        let file = tokio::fs::File::open(self.unit_path(unit))
            .await
            .map_err(|_| AppError::Schema(format!("unknown unit '{}'", unit)))?;
        let mut reader = AsyncReaderBuilder::new().create_reader(file);
        let headers = reader.headers().await?;
        Ok(AttributeList::new(
            headers
                .iter()
                .map(decode_header)
                .collect::<AppResult<Vec<_>>>()?,
        ))
    }

    async fn try_update_profile(&self, unit: &str, profile: &Profile) -> AppResult<bool> {
        let mut table = self.read_table(unit).await?;
        let filters = match_filters(&table.attributes, profile);
        let mut updated = false;
        for row in table.rows.iter_mut() {
            if !matches(row, &filters) {
                continue;
            }
            for (i, attribute) in table.attributes.iter().enumerate() {
                if profile.attributes().index_of(&attribute.name).is_some() {
                    row.set(i, profile.get_by_name(&attribute.name).cloned());
                }
            }
            updated = true;
        }
        if updated {
            self.write_table(unit, &table.attributes, &table.rows).await?;
        }
        Ok(updated)
    }

    async fn try_delete_profile(&self, unit: &str, condition: &Profile) -> AppResult<()> {
        let table = self.read_table(unit).await?;
        let filters = match_filters(&table.attributes, condition);
        let kept: Vec<Profile> = table
            .rows
            .into_iter()
            .filter(|row| !matches(row, &filters))
            .collect();
        self.write_table(unit, &table.attributes, &kept).await
    }

    async fn try_delete_unit_data(&self, unit: &str) -> AppResult<()> {
        let attributes = self.read_header(unit).await?;
        self.write_table(unit, &attributes, &[]).await
    }
}

#[async_trait::async_trait]
impl ProviderAssoc for FlatAssoc {
    fn store_uri(&self) -> &str {
        &self.uri
    }

    async fn get_unit_list(&self) -> UnitList {
        let _io = self.io.lock().await;
        self.try_get_unit_list().await.unwrap_or_else(|e| {
            tracing::error!(error = %e, "Failed to list units");
            UnitList::default()
        })
    }

    async fn contains_unit(&self, unit: &str) -> bool {
        let _io = self.io.lock().await;
        self.exists(unit).await.unwrap_or(false)
    }

    async fn create_unit(&self, unit: &str, attributes: &AttributeList) -> bool {
        let _io = self.io.lock().await;
        self.try_create_unit(unit, attributes).await.unwrap_or_else(|e| {
            tracing::error!(unit = %unit, error = %e, "Failed to create unit");
            false
        })
    }

    async fn drop_unit(&self, unit: &str) -> bool {
        let _io = self.io.lock().await;
        match tokio::fs::remove_file(self.unit_path(unit)).await {
            Ok(()) => true,
            Err(e) => {
                tracing::warn!(unit = %unit, error = %e, "Failed to drop unit");
                false
            }
        }
    }

    async fn delete_unit_data(&self, unit: &str) -> bool {
        let _io = self.io.lock().await;
        match self.try_delete_unit_data(unit).await {
            Ok(()) => true,
            Err(e) => {
                tracing::error!(unit = %unit, error = %e, "Failed to delete unit data");
                false
            }
        }
    }

    async fn get_attributes(&self, unit: &str) -> Option<AttributeList> {
        let _io = self.io.lock().await;
        match self.try_get_attributes(unit).await {
            Ok(attributes) => Some(attributes),
            Err(e) => {
                tracing::error!(unit = %unit, error = %e, "Failed to read attributes");
                None
            }
        }
    }

    async fn get_profiles(&self, unit: &str, condition: Option<&Profile>) -> Vec<Profile> {
        let _io = self.io.lock().await;
        self.try_get_profiles(unit, condition).await.unwrap_or_else(|e| {
            tracing::error!(unit = %unit, error = %e, "Failed to read profiles");
            Vec::new()
        })
    }

    async fn insert_profile(&self, unit: &str, profile: &Profile) -> bool {
        let _io = self.io.lock().await;
        match self.try_insert_profile(unit, profile).await {
            Ok(()) => true,
            Err(e) => {
                tracing::error!(unit = %unit, error = %e, "Failed to insert profile");
                false
            }
        }
    }

    async fn update_profile(&self, unit: &str, profile: &Profile) -> bool {
        let _io = self.io.lock().await;
        self.try_update_profile(unit, profile).await.unwrap_or_else(|e| {
            tracing::error!(unit = %unit, error = %e, "Failed to update profile");
            false
        })
    }

    async fn delete_profile(&self, unit: &str, condition: &Profile) -> bool {
        let _io = self.io.lock().await;
        match self.try_delete_profile(unit, condition).await {
            Ok(()) => true,
            Err(e) => {
                tracing::error!(unit = %unit, error = %e, "Failed to delete profile");
                false
            }
        }
    }

    async fn close(&self) {
        let _io = self.io.lock().await;
        tracing::debug!(root = %self.root.display(), "Closed flat-file store");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::schema;

    async fn open_store() -> (tempfile::TempDir, FlatAssoc) {
        let dir = tempfile::tempdir().unwrap();
        let config = DataConfig::default().with_store_uri(format!("file:{}", dir.path().display()));
        let store = FlatAssoc::open(&config).await.unwrap();
        (dir, store)
    }

    fn rating(user: i64, item: i64, value: f64) -> Profile {
        let mut row = Profile::new(schema::rating_attributes());
        row.set_by_name(schema::USER_ID, Some(Value::Integer(user)));
        row.set_by_name(schema::ITEM_ID, Some(Value::Integer(item)));
        row.set_by_name(schema::RATING_VALUE, Some(Value::Real(value)));
        row
    }

    #[test]
    fn test_header_cell_round_trip() {
        let attribute = Attribute::new("userid", AttributeType::Integer).key().auto_increment();
        let cell = encode_header(&attribute);
        assert_eq!(cell, "userid~integer~1~1");
        assert_eq!(decode_header(&cell).unwrap(), attribute);

        let bare = decode_header("title").unwrap();
        assert_eq!(bare.kind, AttributeType::String);
        assert!(!bare.key);
    }

    #[test]
    fn test_store_root_strips_scheme() {
        assert_eq!(store_root("file:/tmp/store"), PathBuf::from("/tmp/store"));
        assert_eq!(store_root("file:///tmp/store"), PathBuf::from("/tmp/store"));
        assert_eq!(store_root("data/store"), PathBuf::from("data/store"));
    }

    #[tokio::test]
    async fn test_create_insert_and_read_back() {
        let (_dir, store) = open_store().await;
        assert!(store.create_unit("hdp_rating", &schema::rating_attributes()).await);
        assert!(!store.create_unit("hdp_rating", &schema::rating_attributes()).await);

        assert!(store.insert_profile("hdp_rating", &rating(1, 10, 4.0)).await);
        assert!(store.insert_profile("hdp_rating", &rating(1, 11, 2.5)).await);
        assert!(store.insert_profile("hdp_rating", &rating(2, 10, 5.0)).await);

        let all = store.get_profiles("hdp_rating", None).await;
        assert_eq!(all.len(), 3);
        assert_eq!(all[1].get_f64(schema::RATING_VALUE), Some(2.5));

        let units = store.get_unit_list().await;
        assert!(units.contains("hdp_rating"));
        assert_eq!(units.extras().count(), 0);
    }

    #[tokio::test]
    async fn test_update_replaces_matching_row_only() {
        let (_dir, store) = open_store().await;
        store.create_unit("hdp_rating", &schema::rating_attributes()).await;
        store.insert_profile("hdp_rating", &rating(1, 10, 4.0)).await;
        store.insert_profile("hdp_rating", &rating(1, 11, 2.0)).await;

        assert!(store.update_profile("hdp_rating", &rating(1, 11, 3.0)).await);
        assert!(!store.update_profile("hdp_rating", &rating(9, 9, 3.0)).await);

        let rows = store.get_profiles("hdp_rating", None).await;
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].get_f64(schema::RATING_VALUE), Some(4.0));
        assert_eq!(rows[1].get_f64(schema::RATING_VALUE), Some(3.0));
    }

    #[tokio::test]
    async fn test_delete_and_truncate() {
        let (_dir, store) = open_store().await;
        store.create_unit("hdp_rating", &schema::rating_attributes()).await;
        for item in 1..=3 {
            store.insert_profile("hdp_rating", &rating(1, item, 3.0)).await;
        }
        store.insert_profile("hdp_rating", &rating(2, 1, 3.0)).await;

        let mut by_user = Profile::new(schema::rating_attributes());
        by_user.set_by_name(schema::USER_ID, Some(Value::Integer(1)));
        assert!(store.delete_profile("hdp_rating", &by_user).await);
        assert_eq!(store.count_profiles("hdp_rating").await, 1);

        assert!(store.delete_unit_data("hdp_rating").await);
        assert_eq!(store.count_profiles("hdp_rating").await, 0);
        assert!(store.get_attributes("hdp_rating").await.is_some());
    }

    #[tokio::test]
    async fn test_ids_and_missing_unit() {
        let (_dir, store) = open_store().await;
        store.create_unit("hdp_user", &schema::user_attributes()).await;
        assert_eq!(store.get_profile_max_id("hdp_user").await, -1);

        for id in [3, 1, 7] {
            let mut user = Profile::new(schema::user_attributes());
            user.set_id(id);
            store.insert_profile("hdp_user", &user).await;
        }
        assert_eq!(store.get_profile_ids("hdp_user").await, vec![1, 3, 7]);
        assert_eq!(store.get_profile_max_id("hdp_user").await, 7);

        assert!(store.get_attributes("hdp_nothing").await.is_none());
        assert!(store.get_profiles("hdp_nothing", None).await.is_empty());
        assert!(!store.drop_unit("hdp_nothing").await);
    }
}
