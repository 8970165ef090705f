//! Scroll window shared by every scrollable panel.
//!
//! Scrolled past the top edge costs one line for the "more above" marker;
//! items hidden below cost one line for "more below". Cursor-driven panels use
//! [`ListCursor`]; free-scrolling text uses [`Viewport::scroll_by`] directly.

const MAX_FOLLOW_PASSES: usize = 4;

/// What a panel of `height` lines shows at the current offset.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Window {
    pub start: usize,
    pub end: usize,
    pub more_above: bool,
    pub more_below: bool,
}

impl Window {
    pub fn len(&self) -> usize {
        self.end - self.start
    }

    pub fn is_empty(&self) -> bool {
        self.start == self.end
    }

    pub fn contains(&self, index: usize) -> bool {
        index >= self.start && index < self.end
    }
}

pub fn max_scroll(total: usize, height: usize) -> usize {
    if total <= height {
        0
    } else if height < 2 {
        total - height
    } else {
        // The last rows share the panel with the "more above" marker.
        total - height + 1
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Viewport {
    pub offset: usize,
}

impl Viewport {
    pub fn window(&self, total: usize, height: usize) -> Window {
        let offset = self.offset.min(max_scroll(total, height));
        // A marker is only drawn when at least one row still fits beside it.
        let more_above = offset > 0 && height >= 2;
        let mut effective = height - usize::from(more_above);
        let more_below = offset + effective < total && effective >= 2;
        if more_below {
            effective -= 1;
        }
        Window {
            start: offset.min(total),
            end: (offset + effective).min(total),
            more_above,
            more_below,
        }
    }

    pub fn clamp(&mut self, total: usize, height: usize) {
        self.offset = self.offset.min(max_scroll(total, height));
    }

    /// Moves the offset so `cursor` is on screen once the edge markers are
    /// accounted for.
    pub fn follow(&mut self, cursor: usize, total: usize, height: usize) {
        if total == 0 || height == 0 {
            self.offset = 0;
            return;
        }
        let limit = max_scroll(total, height);

        if cursor < self.offset {
            self.offset = cursor;
        } else if cursor >= self.offset + height {
            self.offset = cursor + 1 - height;
        }
        self.offset = self.offset.min(limit);

        for _ in 0..MAX_FOLLOW_PASSES {
            let window = self.window(total, height);
            let next = if cursor < window.start {
                cursor
            } else if cursor >= window.end {
                self.offset + (cursor + 1 - window.end)
            } else {
                break;
            };
            let next = next.min(limit);
            if next == self.offset {
                break;
            }
            self.offset = next;
        }
    }

    pub fn scroll_by(&mut self, delta: isize, total: usize, height: usize) {
        let next = self.offset.saturating_add_signed(delta);
        self.offset = next.min(max_scroll(total, height));
    }

    pub fn scroll_to_end(&mut self, total: usize, height: usize) {
        self.offset = max_scroll(total, height);
    }
}

/// A cursor into a displayed list plus the viewport that keeps it visible.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ListCursor {
    pub cursor: usize,
    pub viewport: Viewport,
}

impl ListCursor {
    pub fn clamp(&mut self, len: usize) {
        if len == 0 {
            self.cursor = 0;
        } else if self.cursor >= len {
            self.cursor = len - 1;
        }
    }

    pub fn select(&mut self, index: usize, len: usize) {
        self.cursor = index;
        self.clamp(len);
    }

    pub fn move_by(&mut self, delta: isize, len: usize) {
        if len == 0 {
            self.cursor = 0;
            return;
        }
        self.cursor = self.cursor.saturating_add_signed(delta).min(len - 1);
    }

    pub fn sync_viewport(&mut self, len: usize, height: usize) {
        self.clamp(len);
        self.viewport.follow(self.cursor, len, height);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_max_scroll() {
        assert_eq!(max_scroll(18, 7), 12);
        assert_eq!(max_scroll(7, 7), 0);
        assert_eq!(max_scroll(0, 7), 0);
    }

    #[test]
    fn test_indicators_at_both_edges() {
        let top = Viewport { offset: 0 }.window(18, 7);
        assert!(!top.more_above);
        assert!(top.more_below);
        assert_eq!((top.start, top.end), (0, 6));

        let bottom = Viewport {
            offset: max_scroll(18, 7),
        }
        .window(18, 7);
        assert!(bottom.more_above);
        assert!(!bottom.more_below);
        assert_eq!((bottom.start, bottom.end), (12, 18));
    }

    #[test]
    fn test_window_never_exceeds_height() {
        for height in 0..8 {
            for total in 0..20 {
                for offset in 0..=max_scroll(total, height) {
                    let window = Viewport { offset }.window(total, height);
                    let used = window.len()
                        + usize::from(window.more_above)
                        + usize::from(window.more_below);
                    assert!(
                        used <= height,
                        "total {total} height {height} offset {offset} window {window:?}"
                    );
                    if height > 0 && total > 0 {
                        assert!(!window.is_empty(), "no rows: total {total} height {height} offset {offset}");
                    }
                }
            }
        }
    }

    #[test]
    fn test_tiny_panel_drops_markers() {
        let window = Viewport { offset: 1 }.window(3, 1);
        assert_eq!((window.start, window.end), (1, 2));
        assert!(!window.more_above && !window.more_below);

        let window = Viewport { offset: 1 }.window(3, 2);
        assert_eq!((window.start, window.end), (1, 2));
        assert!(window.more_above && !window.more_below);
    }

    #[test]
    fn test_short_list_has_no_indicators() {
        let window = Viewport::default().window(3, 7);
        assert_eq!(window.len(), 3);
        assert!(!window.more_above && !window.more_below);
    }

    #[test]
    fn test_follow_keeps_cursor_visible_everywhere() {
        for height in 1..10 {
            for total in 0..25 {
                let mut viewport = Viewport::default();
                for cursor in (0..total).chain((0..total).rev()) {
                    viewport.follow(cursor, total, height);
                    let window = viewport.window(total, height);
                    assert!(
                        window.contains(cursor),
                        "cursor {cursor} hidden: total {total} height {height} window {window:?}"
                    );
                    assert!(viewport.offset <= max_scroll(total, height));
                }
            }
        }
    }

    #[test]
    fn test_follow_second_pass_accounts_for_indicator() {
        let mut viewport = Viewport::default();
        viewport.follow(6, 18, 7);
        // Row 6 would fit in 7 lines but not once the markers are drawn.
        assert!(viewport.offset > 0);
        assert!(viewport.window(18, 7).contains(6));
    }

    #[test]
    fn test_scroll_by_is_clamped() {
        let mut viewport = Viewport::default();
        viewport.scroll_by(-3, 18, 7);
        assert_eq!(viewport.offset, 0);
        viewport.scroll_by(100, 18, 7);
        assert_eq!(viewport.offset, 12);
        viewport.clamp(5, 7);
        assert_eq!(viewport.offset, 0);
    }

    #[test]
    fn test_list_cursor_clamp() {
        let mut list = ListCursor {
            cursor: 9,
            ..ListCursor::default()
        };
        list.clamp(4);
        assert_eq!(list.cursor, 3);
        list.clamp(0);
        assert_eq!(list.cursor, 0);
        list.move_by(5, 3);
        assert_eq!(list.cursor, 2);
        list.move_by(-10, 3);
        assert_eq!(list.cursor, 0);
    }
}
