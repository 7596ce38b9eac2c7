//! Entity graph on top of the read store.
//!
//! Edges are stored directed but traversal treats them as undirected:
//! `A -> B` makes each a neighbor of the other.

use std::collections::{HashMap, HashSet};

use rusqlite::{params, Connection, OptionalExtension, Row};
use tracing::instrument;

use crate::error::{Result, StateError};
use crate::records::{Edge, Entity, Memory};
use crate::store::{memory_exists, ReadStore};

/// Default edge weight.
pub const DEFAULT_EDGE_WEIGHT: f64 = 1.0;

impl ReadStore {
    /// Insert an entity or overwrite its name/type.
    #[instrument(skip(self, entity), fields(entity_id = %entity.id))]
    pub fn upsert_entity(&self, entity: &Entity) -> Result<()> {
        if entity.id.trim().is_empty() {
            return Err(StateError::InvalidInput("entity id must not be empty".into()));
        }
        self.write(|tx| {
            tx.execute(
                "INSERT INTO entities (id, name, entity_type) VALUES (?1, ?2, ?3)
                 ON CONFLICT(id) DO UPDATE SET name = excluded.name, entity_type = excluded.entity_type",
                params![entity.id, entity.name, entity.entity_type],
            )?;
            Ok(())
        })
    }

    pub fn get_entity(&self, id: &str) -> Result<Option<Entity>> {
        self.with_conn(|conn| load_entity(conn, id))
    }

    pub fn entities_by_type(&self, entity_type: &str) -> Result<Vec<Entity>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT id, name, entity_type FROM entities WHERE entity_type = ?1 ORDER BY id",
            )?;
            let rows = stmt.query_map(params![entity_type], entity_from_row)?;
            Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
        })
    }

    /// Add (or re-weight) a directed edge. Both endpoints must exist.
    #[instrument(skip(self))]
    pub fn add_edge(&self, from: &str, to: &str, relation_type: &str, weight: f64) -> Result<()> {
        if !weight.is_finite() || weight < 0.0 {
            return Err(StateError::InvalidInput(format!(
                "edge weight must be a non-negative number, got {weight}"
            )));
        }
        if relation_type.trim().is_empty() {
            return Err(StateError::InvalidInput("relation type must not be empty".into()));
        }
        self.write(|tx| {
            for id in [from, to] {
                if load_entity(tx, id)?.is_none() {
                    return Err(StateError::not_found("entity", id));
                }
            }
            tx.execute(
                "INSERT INTO edges (from_id, to_id, relation_type, weight) VALUES (?1, ?2, ?3, ?4)
                 ON CONFLICT(from_id, to_id, relation_type) DO UPDATE SET weight = excluded.weight",
                params![from, to, relation_type, weight],
            )?;
            Ok(())
        })
    }

    pub fn edges_from(&self, id: &str) -> Result<Vec<Edge>> {
        self.edges_where("from_id", id)
    }

    pub fn edges_to(&self, id: &str) -> Result<Vec<Edge>> {
        self.edges_where("to_id", id)
    }

    fn edges_where(&self, column: &'static str, id: &str) -> Result<Vec<Edge>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT from_id, to_id, relation_type, weight FROM edges
                 WHERE {column} = ?1 ORDER BY from_id, to_id, relation_type"
            ))?;
            let rows = stmt.query_map(params![id], |row| {
                Ok(Edge {
                    from_entity: row.get(0)?,
                    to_entity: row.get(1)?,
                    relation_type: row.get(2)?,
                    weight: row.get(3)?,
                })
            })?;
            Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
        })
    }

    /// Entities reachable from `id` within `max_hops`, excluding `id`.
    pub fn neighbors(&self, id: &str, max_hops: usize) -> Result<HashSet<String>> {
        let mut reached = self.weighted_neighbors(&[id.to_string()], max_hops)?;
        reached.remove(id);
        Ok(reached.into_keys().collect())
    }

    /// Proximity of every entity reachable from `seeds` within `max_hops`.
    ///
    /// Seeds have proximity 1.0. Each hop multiplies by the edge weight
    /// clamped to `[0, 1]`; the best path wins.
    pub fn weighted_neighbors(
        &self,
        seeds: &[String],
        max_hops: usize,
    ) -> Result<HashMap<String, f64>> {
        self.with_conn(|conn| {
            let mut proximity: HashMap<String, f64> =
                seeds.iter().map(|s| (s.clone(), 1.0)).collect();
            let mut frontier: Vec<String> = seeds.to_vec();
            let mut stmt = conn.prepare(
                "SELECT to_id, weight FROM edges WHERE from_id = ?1
                 UNION ALL
                 SELECT from_id, weight FROM edges WHERE to_id = ?1",
            )?;
            for _ in 0..max_hops {
                if frontier.is_empty() {
                    break;
                }
                let mut next = Vec::new();
                for node in &frontier {
                    let base = proximity.get(node).copied().unwrap_or(0.0);
                    let adjacent = stmt
                        .query_map(params![node], |row| {
                            Ok((row.get::<_, String>(0)?, row.get::<_, f64>(1)?))
                        })?
                        .collect::<rusqlite::Result<Vec<_>>>()?;
                    for (other, weight) in adjacent {
                        let p = base * weight.clamp(0.0, 1.0);
                        let improved = match proximity.get(&other) {
                            Some(&existing) => p > existing,
                            None => true,
                        };
                        if improved {
                            proximity.insert(other.clone(), p);
                            next.push(other);
                        }
                    }
                }
                frontier = next;
            }
            Ok(proximity)
        })
    }

    /// Link a memory to an entity. Both must exist; relinking is a no-op.
    #[instrument(skip(self))]
    pub fn link_memory_entity(&self, memory_id: &str, entity_id: &str) -> Result<()> {
        self.write(|tx| {
            if !memory_exists(tx, memory_id)? {
                return Err(StateError::not_found("memory", memory_id));
            }
            if load_entity(tx, entity_id)?.is_none() {
                return Err(StateError::not_found("entity", entity_id));
            }
            tx.execute(
                "INSERT OR IGNORE INTO memory_entities (memory_id, entity_id) VALUES (?1, ?2)",
                params![memory_id, entity_id],
            )?;
            Ok(())
        })
    }

    pub fn entities_for_memory(&self, memory_id: &str) -> Result<Vec<Entity>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT e.id, e.name, e.entity_type FROM entities e
                 JOIN memory_entities me ON me.entity_id = e.id
                 WHERE me.memory_id = ?1 ORDER BY e.id",
            )?;
            let rows = stmt.query_map(params![memory_id], entity_from_row)?;
            Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
        })
    }

    /// `(memory_id, entity_id)` links touching any of `entity_ids`.
    pub fn links_for_entities(&self, entity_ids: &[String]) -> Result<Vec<(String, String)>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT memory_id, entity_id FROM memory_entities
                 WHERE entity_id = ?1 ORDER BY memory_id",
            )?;
            let mut out = Vec::new();
            for id in entity_ids {
                let rows = stmt.query_map(params![id], |row| Ok((row.get(0)?, row.get(1)?)))?;
                for row in rows {
                    out.push(row?);
                }
            }
            Ok(out)
        })
    }

    /// Distinct memories linked to any of `entity_ids`.
    pub fn memories_for_entities(&self, entity_ids: &[String]) -> Result<Vec<Memory>> {
        let mut ids: Vec<String> = self
            .links_for_entities(entity_ids)?
            .into_iter()
            .map(|(memory_id, _)| memory_id)
            .collect();
        ids.sort();
        ids.dedup();
        self.get_memories(&ids)
    }
}

fn load_entity(conn: &Connection, id: &str) -> Result<Option<Entity>> {
    Ok(conn
        .query_row(
            "SELECT id, name, entity_type FROM entities WHERE id = ?1",
            params![id],
            entity_from_row,
        )
        .optional()?)
}

fn entity_from_row(row: &Row<'_>) -> rusqlite::Result<Entity> {
    Ok(Entity {
        id: row.get(0)?,
        name: row.get(1)?,
        entity_type: row.get(2)?,
    })
}
