use daybrief_common::ClusterMember;

/// Stats from the ingestion stage.
#[derive(Debug, Default, Clone)]
pub struct IngestStats {
    pub sources_fetched: u32,
    pub items_fetched: u32,
    pub items_inserted: u32,
    pub items_updated: u32,
    pub source_errors: u32,
}

/// Stats from the summarize stage.
#[derive(Debug, Default, Clone)]
pub struct SummarizeStats {
    pub total_candidates: u32,
    pub summarized: u32,
    pub copied_exact_dup: u32,
    pub skipped_existing: u32,
    pub errors: u32,
}

/// Stats from the embed stage.
#[derive(Debug, Default, Clone)]
pub struct EmbedStats {
    pub total_candidates: u32,
    pub embedded: u32,
    pub failed_batches: u32,
    pub failed_items: u32,
}

/// One built cluster, reported for visibility into the largest groups.
#[derive(Debug, Clone)]
pub struct ClusterResult {
    pub representative_item_id: i64,
    pub members: Vec<ClusterMember>,
}

/// Stats from the semantic dedup stage.
#[derive(Debug, Default, Clone)]
pub struct DedupStats {
    pub clusters_created: u32,
    pub items_assigned: u32,
    pub items_skipped_no_embedding: u32,
    pub largest_cluster_size: u32,
    pub average_cluster_size: f64,
    pub duration_seconds: f64,
    pub top_clusters: Vec<ClusterResult>,
}

/// Stats from the publish stage.
#[derive(Debug, Default, Clone)]
pub struct PublishStats {
    pub messages_sent: u32,
    pub message_ids: Vec<i64>,
    pub already_published: bool,
}

/// Aggregate result of one pipeline run. Always returned to the caller,
/// success or failure.
#[derive(Debug, Default, Clone)]
pub struct PipelineStats {
    pub window_id: Option<i64>,
    pub ingest: Option<IngestStats>,
    pub summarize: Option<SummarizeStats>,
    pub embed: Option<EmbedStats>,
    pub dedup: Option<DedupStats>,
    pub publish: Option<PublishStats>,
    pub total_duration_seconds: f64,
    pub failed: bool,
    pub error: Option<String>,
}

impl std::fmt::Display for PipelineStats {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "\n=== Pipeline Run Complete ===")?;
        if let Some(window_id) = self.window_id {
            writeln!(f, "Window id:        {window_id}")?;
        }
        if let Some(ingest) = &self.ingest {
            writeln!(
                f,
                "Ingested:         {} fetched / {} inserted / {} updated",
                ingest.items_fetched, ingest.items_inserted, ingest.items_updated
            )?;
        }
        if let Some(summarize) = &self.summarize {
            writeln!(
                f,
                "Summarized:       {} new / {} copied / {} skipped / {} errors",
                summarize.summarized,
                summarize.copied_exact_dup,
                summarize.skipped_existing,
                summarize.errors
            )?;
        }
        if let Some(embed) = &self.embed {
            writeln!(
                f,
                "Embedded:         {} of {} ({} failed batches)",
                embed.embedded, embed.total_candidates, embed.failed_batches
            )?;
        }
        if let Some(dedup) = &self.dedup {
            writeln!(
                f,
                "Clusters:         {} ({} items, largest {})",
                dedup.clusters_created, dedup.items_assigned, dedup.largest_cluster_size
            )?;
        }
        if let Some(publish) = &self.publish {
            writeln!(f, "Messages sent:    {}", publish.messages_sent)?;
        }
        writeln!(f, "Duration:         {:.2}s", self.total_duration_seconds)?;
        if self.failed {
            writeln!(
                f,
                "Status:           FAILED ({})",
                self.error.as_deref().unwrap_or("unknown error")
            )?;
        } else {
            writeln!(f, "Status:           ok")?;
        }
        Ok(())
    }
}
