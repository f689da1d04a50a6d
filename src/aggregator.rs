use std::collections::HashSet;

use tracing::debug;

use crate::post::Post;

/// Collects posts across pages, keeping the first occurrence of every post id
#[derive(Debug, Clone)]
pub struct ResultAggregator {
    max_posts: usize,
    seen: HashSet<String>,
    posts: Vec<Post>,
}

impl ResultAggregator {
    pub fn new(max_posts: usize) -> Self {
        Self {
            max_posts,
            seen: HashSet::new(),
            posts: Vec::new(),
        }
    }

    /// Add a batch in page order. Returns the number of new posts.
    pub fn add(&mut self, batch: impl IntoIterator<Item = Post>) -> usize {
        let mut added = 0;
        let mut duplicates = 0;
        for post in batch {
            if self.seen.insert(post.post_id().to_string()) {
                self.posts.push(post);
                added += 1;
            } else {
                duplicates += 1;
            }
        }
        if duplicates > 0 {
            debug!("Dropped {} duplicate posts", duplicates);
        }
        added
    }

    /// Number of unique posts collected so far
    pub fn len(&self) -> usize {
        self.posts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.posts.is_empty()
    }

    pub fn is_full(&self) -> bool {
        self.posts.len() >= self.max_posts
    }

    /// Unique posts in first-encountered order, truncated to the maximum
    pub fn finalize(mut self) -> Vec<Post> {
        self.posts.truncate(self.max_posts);
        self.posts
    }
}
