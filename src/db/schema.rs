use sea_orm::{ConnectionTrait, DatabaseConnection, DbErr, EntityTrait, Schema};
use tracing::debug;

use crate::db::entities::{measurement, measurement_alert, measurement_result};

async fn create_table<E: EntityTrait>(db: &DatabaseConnection, entity: E) -> Result<(), DbErr> {
    let table = entity.table_name().to_owned();
    let backend = db.get_database_backend();
    let schema = Schema::new(backend);
    let mut statement = schema.create_table_from_entity(entity);
    statement.if_not_exists();
    db.execute(backend.build(&statement)).await?;
    debug!(table = %table, "Ensured table exists.");
    Ok(())
}

/// Creates the measurement tables if they are missing. Parents first so the
/// foreign keys on the child tables resolve.
pub async fn create_tables(db: &DatabaseConnection) -> Result<(), DbErr> {
    create_table(db, measurement::Entity).await?;
    create_table(db, measurement_result::Entity).await?;
    create_table(db, measurement_alert::Entity).await?;
    Ok(())
}
