use super::*;
use crate::helpers::utils::EchoRandom;

parameterized_test! {can_generate_noise, (use_min, value, expected), {
    let noise = Noise::new(0.5, (-0.1, 0.2), Arc::new(EchoRandom::new(use_min)));

    assert_eq!(noise.generate(value), expected);
}}

can_generate_noise! {
    case_01_miss_keeps_value: (true, 1., 1.),
    case_02_hit_adds_max: (false, 1., 1.2),
}

#[test]
fn can_generate_noise_for_every_value() {
    let noise = Noise::new(1., (0., 1.), Arc::new(EchoRandom::new(false)));

    let values = noise.generate_multi(vec![0., 1., 2.].into_iter()).collect::<Vec<_>>();

    assert_eq!(values, vec![1., 2., 3.]);
}
