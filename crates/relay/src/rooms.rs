use crate::db::pool::{check_pool_health, create_pg_pool, PoolConfig};
use anyhow::Context;
use std::{collections::HashMap, sync::Arc};
use tokio::sync::RwLock;
use watchroom_common::types::RoomDescriptor;

/// Read-only view of the room store. Rooms are created and edited by the
/// REST service; the relay only resolves them when a participant connects.
#[derive(Clone)]
pub enum RoomCatalog {
    Postgres(sqlx::PgPool),
    Memory(Arc<RwLock<HashMap<String, RoomDescriptor>>>),
}

impl RoomCatalog {
    pub async fn connect(database_url: &str) -> anyhow::Result<Self> {
        let pool = create_pg_pool(database_url, PoolConfig::from_env())
            .await
            .context("failed to initialize relay PostgreSQL pool for room lookups")?;
        check_pool_health(&pool)
            .await
            .context("relay PostgreSQL health check failed for room lookups")?;

        Ok(Self::Postgres(pool))
    }

    pub fn in_memory() -> Self {
        Self::Memory(Arc::new(RwLock::new(HashMap::new())))
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Self::Postgres(_) => "postgres",
            Self::Memory(_) => "memory",
        }
    }

    /// Looks up a live (not soft-deleted) room.
    pub async fn find_room(&self, room_id: &str) -> anyhow::Result<Option<RoomDescriptor>> {
        match self {
            Self::Postgres(pool) => {
                let row = sqlx::query_as::<_, (String, String, String, String, i32)>(
                    r#"
                    SELECT id, owner_id, name, theme, max_seats
                    FROM rooms
                    WHERE id = $1
                      AND deleted_at IS NULL
                    "#,
                )
                .bind(room_id)
                .fetch_optional(pool)
                .await
                .context("failed to query room for websocket session")?;

                let Some((id, owner_id, name, theme, max_seats)) = row else {
                    return Ok(None);
                };
                let max_seats = usize::try_from(max_seats)
                    .with_context(|| format!("invalid max_seats {max_seats} for room '{id}'"))?;

                Ok(Some(RoomDescriptor { id, name, theme, owner_id, max_seats }))
            }
            Self::Memory(rooms) => Ok(rooms.read().await.get(room_id).cloned()),
        }
    }

    /// Adds or replaces a room in the in-memory catalog. No-op for Postgres.
    pub async fn insert(&self, room: RoomDescriptor) {
        if let Self::Memory(rooms) = self {
            rooms.write().await.insert(room.id.clone(), room);
        }
    }

    pub async fn delete(&self, room_id: &str) {
        if let Self::Memory(rooms) = self {
            rooms.write().await.remove(room_id);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::RoomCatalog;
    use watchroom_common::types::RoomDescriptor;

    fn room(id: &str) -> RoomDescriptor {
        RoomDescriptor {
            id: id.to_string(),
            name: "Late Show".to_string(),
            theme: "drive_in".to_string(),
            owner_id: "owner-1".to_string(),
            max_seats: 8,
        }
    }

    #[tokio::test]
    async fn memory_catalog_resolves_inserted_rooms() {
        let catalog = RoomCatalog::in_memory();
        catalog.insert(room("room-1")).await;

        let found = catalog.find_room("room-1").await.expect("lookup should succeed");
        assert_eq!(found, Some(room("room-1")));
        assert_eq!(catalog.find_room("missing").await.expect("lookup should succeed"), None);
        assert_eq!(catalog.kind(), "memory");
    }

    #[tokio::test]
    async fn deleted_rooms_are_not_found() {
        let catalog = RoomCatalog::in_memory();
        catalog.insert(room("room-1")).await;
        catalog.delete("room-1").await;

        assert_eq!(catalog.find_room("room-1").await.expect("lookup should succeed"), None);
    }
}
