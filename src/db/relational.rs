use std::sync::Arc;

use sqlx::{
    any::{AnyArguments, AnyPoolOptions, AnyRow},
    query::Query,
    Any, AnyPool, Row,
};

use crate::{
    config::{DataConfig, UnitNames},
    error::{AppError, AppResult},
    models::{Attribute, AttributeList, AttributeType, Profile, Unit, UnitList, Value},
};

use super::{attach_nominals, match_filters, ProviderAssoc};

type AnyQuery<'q> = Query<'q, Any, AnyArguments<'q>>;

/// SQL flavour of a relational store
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SqlDialect {
    Sqlite,
    Postgres,
}

impl SqlDialect {
    pub fn from_uri(uri: &str) -> Option<SqlDialect> {
        if uri.starts_with("sqlite:") {
            Some(SqlDialect::Sqlite)
        } else if uri.starts_with("postgres:") || uri.starts_with("postgresql:") {
            Some(SqlDialect::Postgres)
        } else {
            None
        }
    }

    fn quote(&self, ident: &str) -> String {
        format!("\"{}\"", ident.replace('"', "\"\""))
    }

    fn column_type(&self, kind: AttributeType) -> &'static str {
        match (self, kind) {
            (_, AttributeType::Bit) => "SMALLINT",
            (_, AttributeType::Integer | AttributeType::Nominal) => "BIGINT",
            (_, AttributeType::Real) => "DOUBLE PRECISION",
            (_, AttributeType::String) => "TEXT",
            (SqlDialect::Sqlite, AttributeType::Date) => "TIMESTAMP",
            (SqlDialect::Postgres, AttributeType::Date) => "TIMESTAMPTZ",
            (SqlDialect::Sqlite, AttributeType::Object) => "JSON",
            (SqlDialect::Postgres, AttributeType::Object) => "JSONB",
        }
    }

    /// Inverse of [`SqlDialect::column_type`] over catalog type names
    fn attribute_type(&self, declared: &str) -> AttributeType {
        let declared = declared.trim().to_ascii_lowercase();
        match declared.as_str() {
            "smallint" | "int2" => AttributeType::Bit,
            "bigint" | "int8" | "integer" | "int" | "int4" => AttributeType::Integer,
            "double precision" | "double" | "real" | "float" | "float8" | "numeric" => {
                AttributeType::Real
            }
            "json" | "jsonb" => AttributeType::Object,
            d if d.contains("timestamp") || d == "date" => AttributeType::Date,
            _ => AttributeType::String,
        }
    }

    /// Bind parameter `n` (1-based) for a value of `kind`
    fn placeholder(&self, n: usize, kind: AttributeType) -> String {
        match self {
            SqlDialect::Sqlite => "?".to_string(),
            SqlDialect::Postgres => match kind {
                AttributeType::Bit => format!("CAST(${} AS SMALLINT)", n),
                AttributeType::Date => format!("CAST(${} AS TIMESTAMPTZ)", n),
                AttributeType::Object => format!("CAST(${} AS JSONB)", n),
                _ => format!("${}", n),
            },
        }
    }

    /// Select expression decoding uniformly through the `Any` driver
    fn select_expr(&self, column: &str, kind: AttributeType) -> String {
        let column = self.quote(column);
        match kind {
            AttributeType::Bit | AttributeType::Integer | AttributeType::Nominal => {
                format!("CAST({} AS BIGINT)", column)
            }
            AttributeType::Real => format!("CAST({} AS DOUBLE PRECISION)", column),
            AttributeType::String => column,
            AttributeType::Date | AttributeType::Object => format!("CAST({} AS TEXT)", column),
        }
    }
}

/// Creates a connection pool for a relational store
///
/// In-memory SQLite databases live inside a single connection, so the pool is pinned to one
/// connection that never expires. Every pool opened on `sqlite::memory:` gets a private
/// database; stores that several pools must share need a named URI such as
/// `sqlite:file:ratings?mode=memory&cache=shared`.
pub async fn create_pool(config: &DataConfig, dialect: SqlDialect) -> anyhow::Result<AnyPool> {
    sqlx::any::install_default_drivers();

    let url = connection_url(config, dialect);
    let in_memory = url.contains(":memory:") || url.contains("mode=memory");
    let options = if in_memory {
        AnyPoolOptions::new()
            .max_connections(1)
            .min_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
    } else {
        AnyPoolOptions::new().max_connections(5)
    };

    let pool = options.connect(&url).await?;
    Ok(pool)
}

fn connection_url(config: &DataConfig, dialect: SqlDialect) -> String {
    let uri = config.store_uri.clone();
    match dialect {
        SqlDialect::Sqlite if !uri.contains(":memory:") && !uri.contains('?') => {
            format!("{}?mode=rwc", uri)
        }
        SqlDialect::Postgres if !config.store_account.is_empty() && !uri.contains('@') => {
            match uri.split_once("://") {
                Some((scheme, rest)) => format!(
                    "{}://{}:{}@{}",
                    scheme, config.store_account, config.store_password, rest
                ),
                None => uri,
            }
        }
        _ => uri,
    }
}

fn bind_value<'q>(query: AnyQuery<'q>, value: &Value, kind: AttributeType) -> AnyQuery<'q> {
    match value.coerce(kind) {
        Some(Value::Bit(b)) => query.bind(i64::from(b)),
        Some(Value::Integer(i)) => query.bind(i),
        Some(Value::Real(f)) => query.bind(f),
        Some(Value::Date(d)) => query.bind(d.to_rfc3339()),
        Some(Value::Text(s)) => query.bind(s),
        Some(Value::Object(o)) => query.bind(o.to_string()),
        None => query.bind(value.to_text()),
    }
}

fn decode_row(row: &AnyRow, attributes: &Arc<AttributeList>) -> AppResult<Profile> {
    let mut profile = Profile::new(attributes.clone());
    for (i, attribute) in attributes.iter().enumerate() {
        let value = match attribute.kind {
            AttributeType::Bit => row.try_get::<Option<i64>, _>(i)?.map(|b| Value::Bit(b != 0)),
            AttributeType::Integer | AttributeType::Nominal => {
                row.try_get::<Option<i64>, _>(i)?.map(Value::Integer)
            }
            AttributeType::Real => row.try_get::<Option<f64>, _>(i)?.map(Value::Real),
            AttributeType::String => row.try_get::<Option<String>, _>(i)?.map(Value::Text),
            AttributeType::Date | AttributeType::Object => row
                .try_get::<Option<String>, _>(i)?
                .and_then(|text| Value::parse(attribute.kind, &text)),
        };
        profile.set(i, value);
    }
    Ok(profile)
}

/// Store backed by a SQL database through the sqlx `Any` driver
pub struct RelationalAssoc {
    uri: String,
    pool: AnyPool,
    dialect: SqlDialect,
    units: UnitNames,
}

impl RelationalAssoc {
    pub async fn open(config: &DataConfig, dialect: SqlDialect) -> AppResult<Self> {
        let pool = create_pool(config, dialect)
            .await
            .map_err(|e| AppError::Storage(format!("cannot open '{}': {}", config.store_uri, e)))?;
        tracing::info!(dialect = ?dialect, "Opened relational store");
        Ok(Self {
            uri: config.store_uri.clone(),
            pool,
            dialect,
            units: config.units.clone(),
        })
    }

    pub fn dialect(&self) -> SqlDialect {
        self.dialect
    }

    pub fn pool(&self) -> &AnyPool {
        &self.pool
    }

    /// Builds `WHERE ...` for the given filters, numbering placeholders from `first`
    fn where_clause(&self, attributes: &AttributeList, filters: &[(usize, Value)], first: usize) -> String {
        if filters.is_empty() {
            return String::new();
        }
        let terms: Vec<String> = filters
            .iter()
            .enumerate()
            .filter_map(|(n, (i, _))| {
                attributes.get(*i).map(|a| {
                    format!(
                        "{} = {}",
                        self.dialect.quote(&a.name),
                        self.dialect.placeholder(first + n, a.kind)
                    )
                })
            })
            .collect();
        format!(" WHERE {}", terms.join(" AND "))
    }

    fn bind_filters<'q>(
        query: AnyQuery<'q>,
        attributes: &AttributeList,
        filters: &[(usize, Value)],
    ) -> AnyQuery<'q> {
        filters.iter().fold(query, |query, (i, value)| {
            let kind = attributes.get(*i).map(|a| a.kind).unwrap_or(AttributeType::String);
            bind_value(query, value, kind)
        })
    }

    async fn column_schema(&self, unit: &str) -> AppResult<AttributeList> {
        let attributes: Vec<Attribute> = match self.dialect {
            SqlDialect::Sqlite => {
                let rows = sqlx::query(
                    "SELECT name, type, CAST(pk AS BIGINT) FROM pragma_table_info(?) ORDER BY cid",
                )
                .bind(unit.to_string())
                .fetch_all(&self.pool)
                .await?;
                rows.iter()
                    .map(|row| -> AppResult<Attribute> {
                        let name: String = row.try_get(0)?;
                        let declared: String = row.try_get(1)?;
                        let pk: i64 = row.try_get(2)?;
                        let mut attribute = Attribute::new(name, self.dialect.attribute_type(&declared));
                        attribute.key = pk > 0;
                        Ok(attribute)
                    })
                    .collect::<AppResult<Vec<_>>>()?
            }
            SqlDialect::Postgres => {
                let rows = sqlx::query(
                    "SELECT column_name::text, data_type::text FROM information_schema.columns \
                     WHERE table_schema = current_schema() AND table_name = $1 \
                     ORDER BY ordinal_position",
                )
                .bind(unit.to_string())
                .fetch_all(&self.pool)
                .await?;
                let keys: Vec<String> = sqlx::query(
                    "SELECT kcu.column_name::text FROM information_schema.table_constraints tc \
                     JOIN information_schema.key_column_usage kcu \
                       ON tc.constraint_name = kcu.constraint_name AND tc.table_schema = kcu.table_schema \
                     WHERE tc.constraint_type = 'PRIMARY KEY' AND tc.table_schema = current_schema() \
                       AND tc.table_name = $1",
                )
                .bind(unit.to_string())
                .fetch_all(&self.pool)
                .await?
                .iter()
                .map(|row| row.try_get::<String, _>(0))
                .collect::<Result<_, _>>()?;
                rows.iter()
                    .map(|row| -> AppResult<Attribute> {
                        let name: String = row.try_get(0)?;
                        let declared: String = row.try_get(1)?;
                        let mut attribute = Attribute::new(name, self.dialect.attribute_type(&declared));
                        attribute.key = keys.contains(&attribute.name);
                        Ok(attribute)
                    })
                    .collect::<AppResult<Vec<_>>>()?
            }
        };

        if attributes.is_empty() {
            return Err(AppError::Schema(format!("unknown unit '{}'", unit)));
        }
        Ok(AttributeList::new(attributes))
    }

    async fn try_get_unit_list(&self) -> AppResult<UnitList> {
        let sql = match self.dialect {
            SqlDialect::Sqlite => {
                "SELECT name FROM sqlite_master WHERE type = 'table' AND name NOT LIKE 'sqlite_%' ORDER BY name"
            }
            SqlDialect::Postgres => {
                "SELECT table_name::text FROM information_schema.tables \
                 WHERE table_schema = current_schema() ORDER BY table_name"
            }
        };
        let rows = sqlx::query(sql).fetch_all(&self.pool).await?;
        let units = rows
            .iter()
            .map(|row| -> AppResult<Unit> {
                let name: String = row.try_get(0)?;
                let extra = !self.units.contains(&name);
                Ok(Unit::new(name, extra))
            })
            .collect::<AppResult<Vec<_>>>()?;
        Ok(UnitList { units })
    }

    async fn try_create_unit(&self, unit: &str, attributes: &AttributeList) -> AppResult<()> {
        let mut columns: Vec<String> = attributes
            .iter()
            .map(|a| format!("{} {}", self.dialect.quote(&a.name), self.dialect.column_type(a.kind)))
            .collect();
        let keys: Vec<String> = attributes
            .iter()
            .filter(|a| a.key)
            .map(|a| self.dialect.quote(&a.name))
            .collect();
        if !keys.is_empty() {
            columns.push(format!("PRIMARY KEY ({})", keys.join(", ")));
        }
        let sql = format!("CREATE TABLE {} ({})", self.dialect.quote(unit), columns.join(", "));
        sqlx::query(&sql).execute(&self.pool).await?;
        Ok(())
    }

    async fn try_get_attributes(&self, unit: &str) -> AppResult<AttributeList> {
        let mut attributes = self.column_schema(unit).await?;
        if unit != self.units.nominal {
            if let Ok(nominal_attributes) = self.column_schema(&self.units.nominal).await {
                let nominal_attributes = Arc::new(nominal_attributes);
                let rows = self.select(&self.units.nominal, &nominal_attributes, None).await?;
                attach_nominals(&mut attributes, unit, &rows);
            }
        }
        Ok(attributes)
    }

    async fn select(
        &self,
        unit: &str,
        attributes: &Arc<AttributeList>,
        condition: Option<&Profile>,
    ) -> AppResult<Vec<Profile>> {
        let columns: Vec<String> = attributes
            .iter()
            .map(|a| self.dialect.select_expr(&a.name, a.kind))
            .collect();
        let filters = condition
            .map(|c| match_filters(attributes, c))
            .unwrap_or_default();
        let sql = format!(
            "SELECT {} FROM {}{}",
            columns.join(", "),
            self.dialect.quote(unit),
            self.where_clause(attributes, &filters, 1)
        );
        let query = Self::bind_filters(sqlx::query(&sql), attributes, &filters);
        let rows = query.fetch_all(&self.pool).await?;
        rows.iter().map(|row| decode_row(row, attributes)).collect()
    }

    async fn try_get_profiles(&self, unit: &str, condition: Option<&Profile>) -> AppResult<Vec<Profile>> {
        let attributes = Arc::new(self.column_schema(unit).await?);
        self.select(unit, &attributes, condition).await
    }

    async fn try_insert_profile(&self, unit: &str, profile: &Profile) -> AppResult<()> {
        let attributes = self.column_schema(unit).await?;
        let present: Vec<(usize, Value)> = attributes
            .iter()
            .enumerate()
            .filter_map(|(i, a)| profile.get_by_name(&a.name).map(|v| (i, v.clone())))
            .collect();

        let sql = if present.is_empty() {
            format!("INSERT INTO {} DEFAULT VALUES", self.dialect.quote(unit))
        } else {
            let mut columns = Vec::with_capacity(present.len());
            let mut params = Vec::with_capacity(present.len());
            for (n, (i, _)) in present.iter().enumerate() {
                if let Some(a) = attributes.get(*i) {
                    columns.push(self.dialect.quote(&a.name));
                    params.push(self.dialect.placeholder(n + 1, a.kind));
                }
            }
            format!(
                "INSERT INTO {} ({}) VALUES ({})",
                self.dialect.quote(unit),
                columns.join(", "),
                params.join(", ")
            )
        };
        let query = Self::bind_filters(sqlx::query(&sql), &attributes, &present);
        query.execute(&self.pool).await?;
        Ok(())
    }

    async fn try_update_profile(&self, unit: &str, profile: &Profile) -> AppResult<bool> {
        let attributes = self.column_schema(unit).await?;
        let filters = match_filters(&attributes, profile);
        let filtered: Vec<usize> = filters.iter().map(|(i, _)| *i).collect();

        let mut assignments = Vec::new();
        let mut values: Vec<(usize, Value)> = Vec::new();
        for (i, a) in attributes.iter().enumerate() {
            if filtered.contains(&i) || profile.attributes().index_of(&a.name).is_none() {
                continue;
            }
            match profile.get_by_name(&a.name) {
                Some(value) => {
                    values.push((i, value.clone()));
                    assignments.push(format!(
                        "{} = {}",
                        self.dialect.quote(&a.name),
                        self.dialect.placeholder(values.len(), a.kind)
                    ));
                }
                None => assignments.push(format!("{} = NULL", self.dialect.quote(&a.name))),
            }
        }

        if assignments.is_empty() {
            let attributes = Arc::new(attributes);
            return Ok(!self.select(unit, &attributes, Some(profile)).await?.is_empty());
        }

        let sql = format!(
            "UPDATE {} SET {}{}",
            self.dialect.quote(unit),
            assignments.join(", "),
            self.where_clause(&attributes, &filters, values.len() + 1)
        );
        let query = Self::bind_filters(sqlx::query(&sql), &attributes, &values);
        let query = Self::bind_filters(query, &attributes, &filters);
        let result = query.execute(&self.pool).await?;
        Ok(result.rows_affected() > 0)
    }

    async fn try_delete_profile(&self, unit: &str, condition: &Profile) -> AppResult<()> {
        let attributes = self.column_schema(unit).await?;
        let filters = match_filters(&attributes, condition);
        let sql = format!(
            "DELETE FROM {}{}",
            self.dialect.quote(unit),
            self.where_clause(&attributes, &filters, 1)
        );
        let query = Self::bind_filters(sqlx::query(&sql), &attributes, &filters);
        query.execute(&self.pool).await?;
        Ok(())
    }

    async fn id_column(&self, unit: &str) -> AppResult<Option<String>> {
        let attributes = self.column_schema(unit).await?;
        Ok(attributes
            .id_index()
            .and_then(|i| attributes.get(i))
            .map(|a| a.name.clone()))
    }

    async fn try_get_profile_ids(&self, unit: &str) -> AppResult<Vec<i64>> {
        let Some(column) = self.id_column(unit).await? else {
            return Ok(Vec::new());
        };
        let column = self.dialect.quote(&column);
        let sql = format!(
            "SELECT DISTINCT CAST({c} AS BIGINT) FROM {t} WHERE {c} IS NOT NULL ORDER BY 1",
            c = column,
            t = self.dialect.quote(unit)
        );
        let rows = sqlx::query(&sql).fetch_all(&self.pool).await?;
        Ok(rows
            .iter()
            .map(|row| row.try_get::<i64, _>(0))
            .collect::<Result<_, _>>()?)
    }

    async fn try_get_profile_max_id(&self, unit: &str) -> AppResult<i64> {
        let Some(column) = self.id_column(unit).await? else {
            return Ok(-1);
        };
        let sql = format!(
            "SELECT CAST(MAX({}) AS BIGINT) FROM {}",
            self.dialect.quote(&column),
            self.dialect.quote(unit)
        );
        let row = sqlx::query(&sql).fetch_one(&self.pool).await?;
        Ok(row.try_get::<Option<i64>, _>(0)?.unwrap_or(-1))
    }

    async fn try_count_profiles(&self, unit: &str) -> AppResult<usize> {
        let sql = format!("SELECT COUNT(*) FROM {}", self.dialect.quote(unit));
        let row = sqlx::query(&sql).fetch_one(&self.pool).await?;
        let count: i64 = row.try_get(0)?;
        Ok(count.max(0) as usize)
    }
}

#[async_trait::async_trait]
impl ProviderAssoc for RelationalAssoc {
    fn store_uri(&self) -> &str {
        &self.uri
    }

    async fn get_unit_list(&self) -> UnitList {
        self.try_get_unit_list().await.unwrap_or_else(|e| {
            tracing::error!(error = %e, "Failed to list units");
            UnitList::default()
        })
    }

    async fn create_unit(&self, unit: &str, attributes: &AttributeList) -> bool {
        match self.try_create_unit(unit, attributes).await {
            Ok(()) => true,
            Err(e) => {
                tracing::error!(unit = %unit, error = %e, "Failed to create unit");
                false
            }
        }
    }

    async fn drop_unit(&self, unit: &str) -> bool {
        let sql = format!("DROP TABLE {}", self.dialect.quote(unit));
        match sqlx::query(&sql).execute(&self.pool).await {
            Ok(_) => true,
            Err(e) => {
                tracing::warn!(unit = %unit, error = %e, "Failed to drop unit");
                false
            }
        }
    }

    async fn delete_unit_data(&self, unit: &str) -> bool {
        let sql = format!("DELETE FROM {}", self.dialect.quote(unit));
        match sqlx::query(&sql).execute(&self.pool).await {
            Ok(_) => true,
            Err(e) => {
                tracing::error!(unit = %unit, error = %e, "Failed to delete unit data");
                false
            }
        }
    }

    async fn get_attributes(&self, unit: &str) -> Option<AttributeList> {
        match self.try_get_attributes(unit).await {
            Ok(attributes) => Some(attributes),
            Err(e) => {
                tracing::error!(unit = %unit, error = %e, "Failed to read attributes");
                None
            }
        }
    }

    async fn get_profiles(&self, unit: &str, condition: Option<&Profile>) -> Vec<Profile> {
        self.try_get_profiles(unit, condition).await.unwrap_or_else(|e| {
            tracing::error!(unit = %unit, error = %e, "Failed to read profiles");
            Vec::new()
        })
    }

    async fn insert_profile(&self, unit: &str, profile: &Profile) -> bool {
        match self.try_insert_profile(unit, profile).await {
            Ok(()) => true,
            Err(e) => {
                tracing::error!(unit = %unit, error = %e, "Failed to insert profile");
                false
            }
        }
    }

    async fn update_profile(&self, unit: &str, profile: &Profile) -> bool {
        self.try_update_profile(unit, profile).await.unwrap_or_else(|e| {
            tracing::error!(unit = %unit, error = %e, "Failed to update profile");
            false
        })
    }

    async fn delete_profile(&self, unit: &str, condition: &Profile) -> bool {
        match self.try_delete_profile(unit, condition).await {
            Ok(()) => true,
            Err(e) => {
                tracing::error!(unit = %unit, error = %e, "Failed to delete profile");
                false
            }
        }
    }

    async fn get_profile_ids(&self, unit: &str) -> Vec<i64> {
        self.try_get_profile_ids(unit).await.unwrap_or_else(|e| {
            tracing::error!(unit = %unit, error = %e, "Failed to read profile ids");
            Vec::new()
        })
    }

    async fn get_profile_max_id(&self, unit: &str) -> i64 {
        self.try_get_profile_max_id(unit).await.unwrap_or_else(|e| {
            tracing::error!(unit = %unit, error = %e, "Failed to read max profile id");
            -1
        })
    }

    async fn count_profiles(&self, unit: &str) -> usize {
        self.try_count_profiles(unit).await.unwrap_or_else(|e| {
            tracing::error!(unit = %unit, error = %e, "Failed to count profiles");
            0
        })
    }

    async fn close(&self) {
        self.pool.close().await;
        tracing::debug!("Closed relational store");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::schema;

    async fn open_memory() -> RelationalAssoc {
        let config = DataConfig::default().with_store_uri("sqlite::memory:");
        RelationalAssoc::open(&config, SqlDialect::Sqlite).await.unwrap()
    }

    fn user(id: i64, kind: i64) -> Profile {
        let mut profile = Profile::new(schema::user_attributes());
        profile.set_id(id);
        profile.set_by_name(schema::USER_TYPE, Some(Value::Integer(kind)));
        profile
    }

    #[test]
    fn test_placeholders_per_dialect() {
        assert_eq!(SqlDialect::Sqlite.placeholder(3, AttributeType::Date), "?");
        assert_eq!(
            SqlDialect::Postgres.placeholder(3, AttributeType::Date),
            "CAST($3 AS TIMESTAMPTZ)"
        );
        assert_eq!(SqlDialect::Postgres.placeholder(1, AttributeType::Integer), "$1");
    }

    #[test]
    fn test_column_types_round_trip() {
        for dialect in [SqlDialect::Sqlite, SqlDialect::Postgres] {
            for kind in [
                AttributeType::Bit,
                AttributeType::Integer,
                AttributeType::Real,
                AttributeType::String,
                AttributeType::Date,
                AttributeType::Object,
            ] {
                assert_eq!(dialect.attribute_type(dialect.column_type(kind)), kind);
            }
        }
        assert_eq!(
            SqlDialect::Postgres.attribute_type("timestamp with time zone"),
            AttributeType::Date
        );
    }

    #[test]
    fn test_connection_url_injects_credentials() {
        let mut config = DataConfig::default().with_store_uri("postgres://db.local/hudup");
        config.store_account = "svc".to_string();
        config.store_password = "pw".to_string();
        assert_eq!(
            connection_url(&config, SqlDialect::Postgres),
            "postgres://svc:pw@db.local/hudup"
        );

        let sqlite = DataConfig::default().with_store_uri("sqlite://ratings.db");
        assert_eq!(connection_url(&sqlite, SqlDialect::Sqlite), "sqlite://ratings.db?mode=rwc");
    }

    #[tokio::test]
    async fn test_schema_introspection() {
        let store = open_memory().await;
        assert!(store.create_unit("hdp_rating", &schema::rating_attributes()).await);

        let attributes = store.get_attributes("hdp_rating").await.unwrap();
        assert_eq!(attributes.names(), vec!["userid", "itemid", "rating", "rating_date"]);
        assert_eq!(attributes.key_indices(), vec![0, 1]);
        assert_eq!(attributes.get(3).unwrap().kind, AttributeType::Date);

        let units = store.get_unit_list().await;
        assert!(units.contains("hdp_rating"));
    }

    #[tokio::test]
    async fn test_profile_crud() {
        let store = open_memory().await;
        store.create_unit("hdp_user", &schema::user_attributes()).await;
        assert_eq!(store.get_profile_max_id("hdp_user").await, -1);

        assert!(store.insert_profile("hdp_user", &user(1, 0)).await);
        assert!(store.insert_profile("hdp_user", &user(4, 1)).await);
        assert_eq!(store.get_profile_ids("hdp_user").await, vec![1, 4]);
        assert_eq!(store.get_profile_max_id("hdp_user").await, 4);

        assert!(store.update_profile("hdp_user", &user(4, 2)).await);
        assert!(!store.update_profile("hdp_user", &user(5, 2)).await);
        let found = store.get_profile("hdp_user", &user(4, 0)).await.unwrap();
        assert_eq!(found.get_i64(schema::USER_TYPE), Some(2));

        assert!(store.delete_profile("hdp_user", &user(1, 0)).await);
        assert_eq!(store.count_profiles("hdp_user").await, 1);
        assert!(store.delete_unit_data("hdp_user").await);
        assert_eq!(store.count_profiles("hdp_user").await, 0);
    }

    #[tokio::test]
    async fn test_dates_survive_storage() {
        let store = open_memory().await;
        store.create_unit("hdp_rating", &schema::rating_attributes()).await;

        let at = chrono::DateTime::parse_from_rfc3339("2020-05-01T10:30:00Z")
            .unwrap()
            .with_timezone(&chrono::Utc);
        let mut row = Profile::new(schema::rating_attributes());
        row.set_by_name(schema::USER_ID, Some(Value::Integer(1)));
        row.set_by_name(schema::ITEM_ID, Some(Value::Integer(2)));
        row.set_by_name(schema::RATING_VALUE, Some(Value::Real(3.5)));
        row.set_by_name(schema::RATING_DATE, Some(Value::Date(at)));
        assert!(store.insert_profile("hdp_rating", &row).await);

        let stored = store.get_profiles("hdp_rating", None).await;
        assert_eq!(stored.len(), 1);
        assert_eq!(stored[0].get_by_name(schema::RATING_DATE), Some(&Value::Date(at)));
        assert_eq!(stored[0].get_f64(schema::RATING_VALUE), Some(3.5));
    }

    #[tokio::test]
    async fn test_missing_unit_is_reported_empty() {
        let store = open_memory().await;
        assert!(store.get_attributes("hdp_nothing").await.is_none());
        assert!(store.get_profiles("hdp_nothing", None).await.is_empty());
        assert!(!store.drop_unit("hdp_nothing").await);
    }
}
