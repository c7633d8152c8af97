//! Fork-join helpers for the per-particle passes.
//!
//! A pass hands over the particle attribute slices it writes, and `f` is called once per
//! particle index with one element of each slice. All slices must have the same length.
//! Every helper returns only after `f` ran for all particles, so consecutive passes are
//! separated by a barrier. With the `single-threaded` feature (and on wasm32) the particles
//! are visited in index order on the calling thread.

pub use internal::*;

#[cfg(any(target_arch = "wasm32", feature = "single-threaded"))]
mod internal {
    pub fn into_par_iter<T>(
        v: impl IntoIterator<Item = T, IntoIter = impl Iterator<Item = T>>,
    ) -> impl Iterator<Item = T> {
        v.into_iter()
    }

    macro_rules! decl_par_iter_mut {
        ($name:ident, $($arr:ident: $t:ident),+) => {
            pub fn $name<$($t: Send + Sync,)+ F: Fn(usize, $(&mut $t),+) + Send + Sync>($($arr: &mut [$t],)+ f: F) {
                let num_particles = super::common_len(&[$($arr.len()),+]);
                for idx in 0..num_particles {
                    f(idx, $(&mut $arr[idx]),+);
                }
            }
        };
    }

    decl_par_iter_mut!(par_iter_mut1, arr1: T1);
    decl_par_iter_mut!(par_iter_mut2, arr1: T1, arr2: T2);
    decl_par_iter_mut!(par_iter_mut3, arr1: T1, arr2: T2, arr3: T3);
    decl_par_iter_mut!(par_iter_mut4, arr1: T1, arr2: T2, arr3: T3, arr4: T4);
}

#[cfg(not(any(target_arch = "wasm32", feature = "single-threaded")))]
mod internal {
    use rayon::prelude::*;

    pub fn into_par_iter<T>(v: impl IntoParallelIterator<Item = T>) -> impl ParallelIterator<Item = T> {
        v.into_par_iter()
    }

    // tuples of indexed parallel iterators zip into flat tuples
    macro_rules! decl_par_iter_mut {
        ($name:ident, $($arr:ident: $t:ident),+) => {
            pub fn $name<$($t: Send + Sync,)+ F: Fn(usize, $(&mut $t),+) + Send + Sync>($($arr: &mut [$t],)+ f: F) {
                super::common_len(&[$($arr.len()),+]);
                ($($arr,)+)
                    .into_par_iter()
                    .enumerate()
                    .for_each(|(idx, ($($arr,)+))| f(idx, $($arr),+));
            }
        };
    }

    decl_par_iter_mut!(par_iter_mut1, arr1: T1);
    decl_par_iter_mut!(par_iter_mut2, arr1: T1, arr2: T2);
    decl_par_iter_mut!(par_iter_mut3, arr1: T1, arr2: T2, arr3: T3);
    decl_par_iter_mut!(par_iter_mut4, arr1: T1, arr2: T2, arr3: T3, arr4: T4);
}

fn common_len(lens: &[usize]) -> usize {
    let num_particles = lens[0];
    assert!(
        lens.iter().all(|&len| len == num_particles),
        "particle attribute slices differ in length: {:?}",
        lens
    );
    num_particles
}

#[test]
fn par_iter_mut_visits_every_index_once() {
    let mut a = vec![0usize; 1000];
    let mut b = vec![0usize; 1000];
    par_iter_mut2(&mut a, &mut b, |i, pa, pb| {
        *pa += i;
        *pb += 1;
    });
    assert!(a.iter().enumerate().all(|(i, &x)| x == i));
    assert!(b.iter().all(|&x| x == 1));
}

#[test]
fn par_iter_mut4_zips_all_slices() {
    let mut a = vec![1; 64];
    let mut b = vec![2; 64];
    let mut c = vec![3; 64];
    let mut d = vec![0; 64];
    par_iter_mut4(&mut a, &mut b, &mut c, &mut d, |i, pa, pb, pc, pd| {
        *pd = *pa + *pb + *pc + i as i32;
    });
    for (i, x) in d.iter().enumerate() {
        assert_eq!(*x, 6 + i as i32);
    }
}

#[test]
fn par_iter_mut1_handles_empty_slices() {
    let mut a: Vec<f32> = Vec::new();
    par_iter_mut1(&mut a, |_, _| panic!("called for an empty slice"));
}

#[test]
#[should_panic(expected = "differ in length")]
fn par_iter_mut_rejects_mismatched_slices() {
    let mut a = vec![0; 4];
    let mut b = vec![0; 5];
    par_iter_mut2(&mut a, &mut b, |_, _, _| {});
}
