//! One-shot visibility gate for expensive content.

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MountState {
    Pending,
    Visible,
}

/// Vertical extent of a unit, in rows, in list coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Region {
    pub top: usize,
    pub height: usize,
}

impl Region {
    #[must_use]
    pub fn new(top: usize, height: usize) -> Self {
        Self { top, height }
    }

    #[must_use]
    pub fn bottom(&self) -> usize {
        self.top.saturating_add(self.height)
    }
}

/// Decides whether a pending unit occupying `region` should activate.
pub trait MountTrigger {
    fn should_mount(&self, region: Region) -> bool;
}

/// Activates units that intersect the viewport grown by `margin` rows on
/// both sides.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ViewportTrigger {
    pub top: usize,
    pub height: usize,
    pub margin: usize,
}

impl ViewportTrigger {
    #[must_use]
    pub fn new(top: usize, height: usize, margin: usize) -> Self {
        Self {
            top,
            height,
            margin,
        }
    }
}

impl MountTrigger for ViewportTrigger {
    fn should_mount(&self, region: Region) -> bool {
        let start = self.top.saturating_sub(self.margin);
        let end = self
            .top
            .saturating_add(self.height)
            .saturating_add(self.margin);
        region.top < end && region.bottom().max(region.top + 1) > start
    }
}

/// Activates everything on first observation.
#[derive(Debug, Clone, Copy, Default)]
pub struct Immediate;

impl MountTrigger for Immediate {
    fn should_mount(&self, _region: Region) -> bool {
        true
    }
}

pub enum MountView<'a, T> {
    Placeholder,
    Content(&'a T),
}

/// Holds `T` once it has been built. Content is only ever built inside
/// [`LazyMount::observe`] and is kept until the mount is dropped.
#[derive(Debug, Clone)]
pub struct LazyMount<T> {
    content: Option<T>,
}

impl<T> Default for LazyMount<T> {
    fn default() -> Self {
        Self { content: None }
    }
}

impl<T> LazyMount<T> {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn state(&self) -> MountState {
        if self.content.is_some() {
            MountState::Visible
        } else {
            MountState::Pending
        }
    }

    /// Builds content the first time `trigger` accepts `region`. Once
    /// visible, further observations are ignored.
    pub fn observe<Tr, F>(&mut self, trigger: &Tr, region: Region, build: F) -> MountState
    where
        Tr: MountTrigger + ?Sized,
        F: FnOnce() -> T,
    {
        if self.content.is_none() && trigger.should_mount(region) {
            self.content = Some(build());
        }
        self.state()
    }

    #[must_use]
    pub fn view(&self) -> MountView<'_, T> {
        match &self.content {
            Some(content) => MountView::Content(content),
            None => MountView::Placeholder,
        }
    }

    #[must_use]
    pub fn content(&self) -> Option<&T> {
        self.content.as_ref()
    }

    pub fn content_mut(&mut self) -> Option<&mut T> {
        self.content.as_mut()
    }
}

/// Mounts laid out top to bottom, each entry pairing a source with its
/// lazily built content.
#[derive(Debug, Clone)]
pub struct LazyList<S, T> {
    entries: Vec<(S, LazyMount<T>)>,
    placeholder_height: usize,
}

impl<S, T> LazyList<S, T> {
    #[must_use]
    pub fn new(sources: Vec<S>, placeholder_height: usize) -> Self {
        Self {
            entries: sources
                .into_iter()
                .map(|source| (source, LazyMount::new()))
                .collect(),
            placeholder_height: placeholder_height.max(1),
        }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    #[must_use]
    pub fn mounted(&self) -> usize {
        self.entries
            .iter()
            .filter(|(_, mount)| mount.state() == MountState::Visible)
            .count()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&S, &LazyMount<T>)> {
        self.entries.iter().map(|(source, mount)| (source, mount))
    }

    pub fn get_mut(&mut self, index: usize) -> Option<(&S, &mut LazyMount<T>)> {
        self.entries
            .get_mut(index)
            .map(|(source, mount)| (&*source, mount))
    }

    /// Lays entries out using `height` for mounted content and the
    /// placeholder height otherwise, mounting those the trigger accepts.
    /// Returns each entry's region after the pass.
    pub fn observe<Tr, B, H>(&mut self, trigger: &Tr, mut build: B, height: H) -> Vec<Region>
    where
        Tr: MountTrigger + ?Sized,
        B: FnMut(usize, &S) -> T,
        H: Fn(&T) -> usize,
    {
        let mut top = 0;
        let mut regions = Vec::with_capacity(self.entries.len());
        for (index, (source, mount)) in self.entries.iter_mut().enumerate() {
            let pending = Region::new(top, self.placeholder_height);
            mount.observe(trigger, pending, || build(index, &*source));
            let rows = mount.content().map_or(self.placeholder_height, &height);
            let region = Region::new(top, rows);
            regions.push(region);
            top = region.bottom();
        }
        regions
    }
}

#[cfg(test)]
mod tests {
    use std::cell::Cell;

    use super::{
        Immediate, LazyList, LazyMount, MountState, MountTrigger, MountView, Region,
        ViewportTrigger,
    };

    struct Never;

    impl MountTrigger for Never {
        fn should_mount(&self, _region: Region) -> bool {
            false
        }
    }

    #[test]
    fn pending_mount_never_builds_content() {
        let built = Cell::new(0);
        let mut mount: LazyMount<String> = LazyMount::new();

        for _ in 0..5 {
            mount.observe(&Never, Region::new(0, 1), || {
                built.set(built.get() + 1);
                "full".to_string()
            });
        }

        assert_eq!(built.get(), 0);
        assert_eq!(mount.state(), MountState::Pending);
        assert!(matches!(mount.view(), MountView::Placeholder));
    }

    #[test]
    fn visible_mount_never_reverts_and_builds_once() {
        let built = Cell::new(0);
        let mut mount = LazyMount::new();
        let trigger = ViewportTrigger::new(0, 10, 0);

        mount.observe(&trigger, Region::new(3, 2), || {
            built.set(built.get() + 1);
            42
        });
        let far_away = ViewportTrigger::new(500, 10, 0);
        for _ in 0..3 {
            let state = mount.observe(&far_away, Region::new(3, 2), || {
                built.set(built.get() + 1);
                7
            });
            assert_eq!(state, MountState::Visible);
        }

        assert_eq!(built.get(), 1);
        assert!(matches!(mount.view(), MountView::Content(&42)));
    }

    #[test]
    fn viewport_margin_activates_units_just_outside_the_view() {
        let trigger = ViewportTrigger::new(10, 5, 3);

        assert!(trigger.should_mount(Region::new(17, 1)));
        assert!(trigger.should_mount(Region::new(5, 3)));
        assert!(!trigger.should_mount(Region::new(18, 2)));
        assert!(!trigger.should_mount(Region::new(0, 7)));
    }

    #[test]
    fn immediate_trigger_mounts_on_first_observation() {
        let mut mount = LazyMount::new();
        assert_eq!(
            mount.observe(&Immediate, Region::new(900, 1), || ()),
            MountState::Visible
        );
    }

    #[test]
    fn list_mounts_only_entries_near_the_viewport() {
        let mut list = LazyList::new((0..100).collect::<Vec<u32>>(), 1);
        let built = Cell::new(0);

        let regions = list.observe(
            &ViewportTrigger::new(0, 10, 2),
            |_, source| {
                built.set(built.get() + 1);
                *source * 2
            },
            |_| 3,
        );

        // each mounted entry grows to three rows, pushing later ones down
        assert_eq!(list.mounted(), 4);
        assert_eq!(built.get(), 4);
        assert_eq!(regions[0], Region::new(0, 3));
        assert_eq!(regions[4], Region::new(12, 1));

        list.observe(&ViewportTrigger::new(40, 10, 2), |_, source| *source, |_| 3);
        assert!(list.mounted() > 4);
        let (_, first) = list.get_mut(0).expect("first entry");
        assert_eq!(first.content(), Some(&0));
    }
}
