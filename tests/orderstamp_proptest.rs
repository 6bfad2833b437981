use proptest::prelude::*;
use richsync_core::orderstamp::{self, from_index, from_timestamp, OrderStamp, StampGenerator, CHAR_MAX, CHAR_MIN};

/// Any stamp over the generated alphabet `[CHAR_MIN, CHAR_MAX)`
fn stamp() -> impl Strategy<Value = OrderStamp> {
    prop::collection::vec(CHAR_MIN..CHAR_MAX, 1..8).prop_map(|codes| {
        OrderStamp::from_raw(codes.into_iter().filter_map(char::from_u32).collect::<String>())
    })
}

/// Two stamps with room between them, lower first
fn open_pair() -> impl Strategy<Value = (OrderStamp, OrderStamp)> {
    (stamp(), stamp())
        .prop_filter("stamps need room between them", |(a, b)| {
            orderstamp::try_between(a, b).is_ok()
        })
        .prop_map(|(a, b)| if a < b { (a, b) } else { (b, a) })
}

fn in_alphabet(s: &OrderStamp) -> bool {
    s.as_str()
        .chars()
        .all(|c| (CHAR_MIN..CHAR_MAX).contains(&u32::from(c)))
}

proptest! {
    #[test]
    fn between_is_strictly_inside((lo, hi) in open_pair(), suffix in 1usize..20) {
        let gen = StampGenerator::new(suffix);
        let c = gen.between(&hi, &lo);
        prop_assert!(lo < c, "{:?} !< {:?}", lo, c);
        prop_assert!(c < hi, "{:?} !< {:?}", c, hi);
        prop_assert!(in_alphabet(&c));
    }

    #[test]
    fn repeated_bisection_stays_ordered((lo, hi) in open_pair(), steps in 64usize..80, upward in any::<bool>()) {
        let gen = StampGenerator::new(4);
        let (mut lo, mut hi) = (lo, hi);
        let mut seen = vec![lo.clone(), hi.clone()];
        for _ in 0..steps {
            let next = gen.try_between(&lo, &hi);
            prop_assert!(next.is_ok(), "no room between {:?} and {:?}", lo, hi);
            let next = next.unwrap();
            prop_assert!(lo < next && next < hi);
            prop_assert!(in_alphabet(&next));
            seen.push(next.clone());
            if upward {
                lo = next;
            } else {
                hi = next;
            }
        }
        let mut sorted = seen.clone();
        sorted.sort();
        sorted.dedup();
        prop_assert_eq!(sorted.len(), seen.len());
    }

    #[test]
    fn missing_room_is_an_error(base in stamp(), ones in 1usize..6) {
        let mut padded = base.as_str().to_string();
        padded.extend(std::iter::repeat(char::from_u32(CHAR_MIN).unwrap_or('\u{1}')).take(ones));
        let padded = OrderStamp::from_raw(padded);
        prop_assert!(orderstamp::try_between(&base, &padded).is_err());
        prop_assert!(orderstamp::try_between(&base, &base).is_err());
    }

    #[test]
    fn index_stamps_sort_numerically(x in any::<u64>(), y in any::<u64>()) {
        prop_assert_eq!(from_index(x).cmp(&from_index(y)), x.cmp(&y));
    }

    #[test]
    fn timestamp_stamps_sort_by_time(x in 0u64..4_000_000_000_000, y in 0u64..4_000_000_000_000) {
        prop_assume!(x != y);
        prop_assert_eq!(from_timestamp(x, "zz").cmp(&from_timestamp(y, "aa")), x.cmp(&y));
    }
}

#[test]
fn concurrent_betweens_are_unique() {
    let a = orderstamp::past();
    let b = orderstamp::present();
    let stamps: Vec<_> = (0..200).map(|_| orderstamp::between(&a, &b)).collect();
    let mut unique = stamps.clone();
    unique.sort();
    unique.dedup();
    assert_eq!(unique.len(), stamps.len());
}

#[test]
fn present_is_monotonic() {
    let mut last = orderstamp::present();
    for _ in 0..100 {
        let next = orderstamp::present();
        assert!(last < next);
        last = next;
    }
    assert!(orderstamp::past() < last);
}
